#![allow(dead_code)]

use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::json;
use std::fs::File;
use std::io::Write;
use std::path::Path;

const LAST_MODIFIED: &str = "2024-01-01T00:00:00.000000";

fn dump_line(record_type: &str, key: &str, payload: serde_json::Value) -> String {
    format!("/type/{}\t{}\t1\t{}\t{}", record_type, key, LAST_MODIFIED, payload)
}

fn split_isbns<'a>(isbns: &[&'a str]) -> (Vec<&'a str>, Vec<&'a str>) {
    isbns
        .iter()
        .copied()
        .partition(|isbn| isbn.chars().filter(char::is_ascii_alphanumeric).count() == 10)
}

/// A distinct 13-digit ISBN per `n`. Check digits are not valid.
pub fn numbered_isbn(n: u32) -> String {
    format!("97811{:08}", n)
}

/// An author record, as found in the reference dump.
pub fn author_line(key: &str, name: &str) -> String {
    dump_line("author", key, json!({ "name": name }))
}

/// An edition listing `isbns` and the given author keys.
pub fn edition_line(key: &str, isbns: &[&str], author_keys: &[&str]) -> String {
    let (isbn_10, isbn_13) = split_isbns(isbns);
    let authors: Vec<serde_json::Value> = author_keys.iter().map(|k| json!({ "key": k })).collect();
    dump_line(
        "edition",
        key,
        json!({ "isbn_10": isbn_10, "isbn_13": isbn_13, "authors": authors }),
    )
}

/// An edition listing `isbns` and the works it belongs to.
pub fn cover_edition_line(key: &str, isbns: &[&str], work_keys: &[&str]) -> String {
    let (isbn_10, isbn_13) = split_isbns(isbns);
    let works: Vec<serde_json::Value> = work_keys.iter().map(|k| json!({ "key": k })).collect();
    dump_line(
        "edition",
        key,
        json!({ "isbn_10": isbn_10, "isbn_13": isbn_13, "works": works }),
    )
}

pub fn work_line(key: &str, covers: &[i64]) -> String {
    dump_line("work", key, json!({ "title": "A Work", "covers": covers }))
}

pub fn write_dump(path: &Path, lines: &[String]) {
    let mut file = File::create(path).unwrap();
    for line in lines {
        writeln!(file, "{}", line).unwrap();
    }
}

pub fn write_gz_dump(path: &Path, lines: &[String]) {
    let mut encoder = GzEncoder::new(File::create(path).unwrap(), Compression::default());
    for line in lines {
        writeln!(encoder, "{}", line).unwrap();
    }
    encoder.finish().unwrap();
}
