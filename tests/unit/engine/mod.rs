mod test_authorization;
mod test_rate_limiter;
