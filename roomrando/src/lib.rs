pub mod graph;
pub mod randomize;
pub mod settings;
pub mod spoiler_graph;
