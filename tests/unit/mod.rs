mod recovery_tests;
mod translator_tests;
