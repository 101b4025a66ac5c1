pub mod footer;
pub mod header;
pub mod log_pane;
pub mod render;
pub mod spinner;
pub mod startup;
pub mod tree;
