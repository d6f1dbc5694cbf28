//! Lookups owned by other systems: the course catalog and the instructor
//! directory. The engine only asks whether a reference is known.

use std::collections::HashSet;
use std::io;
use std::path::Path;

use async_trait::async_trait;

#[async_trait]
pub trait Catalog: Send + Sync {
    async fn course_exists(&self, course_ref: &str) -> bool;

    async fn instructor_exists(&self, _instructor_ref: &str) -> bool {
        true
    }
}

/// Accepts every reference.
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenCatalog;

#[async_trait]
impl Catalog for OpenCatalog {
    async fn course_exists(&self, _course_ref: &str) -> bool {
        true
    }
}

/// Fixed reference sets. With no instructors listed, instructors go unchecked.
#[derive(Debug, Default, Clone)]
pub struct StaticCatalog {
    courses: HashSet<String>,
    instructors: Option<HashSet<String>>,
}

impl StaticCatalog {
    pub fn new(
        courses: impl IntoIterator<Item = String>,
        instructors: Option<Vec<String>>,
    ) -> Self {
        Self {
            courses: courses.into_iter().collect(),
            instructors: instructors.map(|v| v.into_iter().collect()),
        }
    }

    /// One `course:<ref>` or `instructor:<ref>` per line; `#` starts a comment.
    pub fn parse(text: &str) -> io::Result<Self> {
        let mut courses = HashSet::new();
        let mut instructors = HashSet::new();
        for (n, raw) in text.lines().enumerate() {
            let line = raw.split('#').next().unwrap_or_default().trim();
            if line.is_empty() {
                continue;
            }
            match line.split_once(':') {
                Some(("course", r)) if !r.trim().is_empty() => {
                    courses.insert(r.trim().to_string());
                }
                Some(("instructor", r)) if !r.trim().is_empty() => {
                    instructors.insert(r.trim().to_string());
                }
                _ => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("catalog line {}: expected course:<ref> or instructor:<ref>", n + 1),
                    ));
                }
            }
        }
        Ok(Self {
            courses,
            instructors: (!instructors.is_empty()).then_some(instructors),
        })
    }

    pub fn from_file(path: &Path) -> io::Result<Self> {
        Self::parse(&std::fs::read_to_string(path)?)
    }

    pub fn course_count(&self) -> usize {
        self.courses.len()
    }
}

#[async_trait]
impl Catalog for StaticCatalog {
    async fn course_exists(&self, course_ref: &str) -> bool {
        self.courses.contains(course_ref)
    }

    async fn instructor_exists(&self, instructor_ref: &str) -> bool {
        self.instructors
            .as_ref()
            .is_none_or(|known| known.contains(instructor_ref))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_catalog_accepts_everything() {
        assert!(OpenCatalog.course_exists("anything").await);
        assert!(OpenCatalog.instructor_exists("anyone").await);
    }

    #[tokio::test]
    async fn parse_catalog_file() {
        let text = "# fall term\ncourse:CS101\ncourse: MATH200 \n\ninstructor:EMP-7 # adjunct\n";
        let catalog = StaticCatalog::parse(text).unwrap();
        assert_eq!(catalog.course_count(), 2);
        assert!(catalog.course_exists("MATH200").await);
        assert!(!catalog.course_exists("BIO1").await);
        assert!(catalog.instructor_exists("EMP-7").await);
        assert!(!catalog.instructor_exists("EMP-8").await);
    }

    #[tokio::test]
    async fn instructors_unchecked_when_unlisted() {
        let catalog = StaticCatalog::parse("course:CS101").unwrap();
        assert!(catalog.instructor_exists("whoever").await);
    }

    #[test]
    fn parse_rejects_garbage() {
        let err = StaticCatalog::parse("course:CS101\nroom:A-101").unwrap_err();
        assert!(err.to_string().contains("line 2"));
        assert!(StaticCatalog::parse("course:").is_err());
    }
}
