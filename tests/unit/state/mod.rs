mod test_resilient_store;
