//! SQL generation for record storage

pub mod condition;
pub mod ddl;
pub mod params;
pub mod sanitize;
pub mod select;

pub use condition::{build_condition_clause, build_order_by_clause, render_expression};
pub use ddl::DdlGenerator;
pub use params::{CompiledQuery, QueryParams, SqlParam};
pub use sanitize::{qualified_name, quote_identifier, validate_name};
pub use select::{compile_count, compile_select, record_columns};
