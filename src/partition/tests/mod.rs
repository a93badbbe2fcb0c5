mod helpers;
mod tests_naming;
