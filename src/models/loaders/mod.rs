pub mod answer_loader;

pub use answer_loader::{load_answer_file, parse_answer_map, scalar_to_string, PresetAnswer};
