mod validation_level_test;
