pub mod assignments;
pub mod attendance;
pub mod auth;
pub mod classes;
pub mod core;
pub mod grades;
pub mod parent;
pub mod parents;
pub mod records;
pub mod relations;
pub mod report_cards;
pub mod students;
pub mod subjects;
pub mod teacher;
pub mod teachers;
pub mod users;
