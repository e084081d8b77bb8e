#![allow(dead_code)]

// Authors
pub const AUTHOR_1_KEY: &str = "/authors/OL1A";
pub const AUTHOR_1_NAME: &str = "Jane Doe";
pub const AUTHOR_2_KEY: &str = "/authors/OL2A";
pub const AUTHOR_2_NAME: &str = "John Roe";
pub const AUTHOR_3_KEY: &str = "/authors/OL3A";
pub const AUTHOR_3_NAME: &str = "Ann Smith";

// Identifiers
pub const ISBN_1: &str = "9780000000001";
pub const ISBN_2: &str = "9780000000002";
pub const ISBN_2_HYPHENATED: &str = "978-0-00-000000-2";
pub const ISBN_3: &str = "9780000000003";
pub const ISBN_UNMAPPED: &str = "9789999999999";
pub const ISBN_13_OF_10: &str = "9780306406157";
pub const ISBN_10: &str = "0306406152";

// Works
pub const WORK_1_KEY: &str = "/works/OL1W";
pub const WORK_1_COVER: i64 = 8231;
