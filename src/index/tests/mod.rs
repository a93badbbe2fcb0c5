mod tests_hash_index;
