pub mod academic_years;
pub mod aspects;
pub mod assessments;
pub mod assessments_bulk;
pub mod classes;
pub mod core;
pub mod stats;
pub mod students;
pub mod teachers;
