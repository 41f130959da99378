
pub mod engine_tests;
pub mod manager_tests;
pub mod manifest_tests;
