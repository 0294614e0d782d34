pub mod extractor;
pub mod jwt;
pub mod money;
pub mod test_utils;
pub mod time;
