pub mod dispatch;
pub mod report;
pub mod run;
pub mod schema;
pub mod user;
