mod capped_eviction_test;
mod capped_notifier_test;
