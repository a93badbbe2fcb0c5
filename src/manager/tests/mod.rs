mod helpers;
mod tests_commit;
mod tests_reads;
mod tests_recovery;
