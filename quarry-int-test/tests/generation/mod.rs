mod generation_table_test;
