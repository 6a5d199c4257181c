mod cli_test;
mod session_test;
