mod tests_row_id;
