mod common;
mod history_tests;
mod queue_tests;
mod storage_tests;
