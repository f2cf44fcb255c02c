//! Cache invalidation signal.
//!
//! The UI caches read views per named tag. Instead of pushing invalidation
//! events, the daemon keeps a generation counter per tag; every successful
//! write bumps the tags whose views it staled, and the UI polls
//! `cache.tags` to decide what to refetch.

use serde_json::json;
use std::collections::BTreeMap;

pub const ASSESSMENT: &str = "assessment";
pub const ASSESSMENTS: &str = "assessments";
pub const STUDENT_ASSESSMENTS: &str = "student-assessments";
pub const STUDENT: &str = "student";
pub const STUDENTS: &str = "students";
pub const TEACHERS: &str = "teachers";
pub const CLASSES: &str = "classes";
pub const ACADEMIC_YEARS: &str = "academic-years";
pub const ASPECTS: &str = "aspects";
pub const STATS: &str = "stats";

#[derive(Default)]
pub struct Tags {
    generations: BTreeMap<&'static str, u64>,
}

impl Tags {
    pub fn bump(&mut self, tags: &[&'static str]) {
        for tag in tags {
            *self.generations.entry(tag).or_insert(0) += 1;
        }
    }

    pub fn snapshot(&self) -> serde_json::Value {
        json!(self.generations)
    }
}
