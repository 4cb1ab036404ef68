pub mod adapter_suite;
