mod delete_test;
mod insert_test;
mod update_test;
