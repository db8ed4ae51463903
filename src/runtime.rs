pub mod global_constants;
pub mod native;
pub mod program;
pub mod string;
pub mod string_table;
pub mod type_info;
pub mod value;
pub mod vm;
