mod pipeline_tests;
mod repair_tests;
