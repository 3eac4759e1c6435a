//! Student Domain Types
//!
//! Students are created by an external CRUD service; the pipeline consumes
//! them read-only. The "active IEP" is a derived view (latest IEP with status
//! active), never a stored back-pointer.

use chrono::{DateTime, NaiveDate, Utc};
use edplan_types::{EdPlanError, Result, StudentId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Disability categories used to select IEP templates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DisabilityCategory {
    /// Specific Learning Disability
    #[serde(rename = "SLD")]
    Sld,
    /// Other Health Impairment
    #[serde(rename = "OHI")]
    Ohi,
    /// Autism
    #[serde(rename = "AUT")]
    Aut,
    /// Speech or Language Impairment
    #[serde(rename = "SLI")]
    Sli,
    /// Emotional Disturbance
    #[serde(rename = "ED")]
    Ed,
    /// Intellectual Disability
    #[serde(rename = "ID")]
    Id,
    /// Multiple Disabilities
    #[serde(rename = "MD")]
    Md,
}

impl DisabilityCategory {
    pub fn code(&self) -> &'static str {
        match self {
            DisabilityCategory::Sld => "SLD",
            DisabilityCategory::Ohi => "OHI",
            DisabilityCategory::Aut => "AUT",
            DisabilityCategory::Sli => "SLI",
            DisabilityCategory::Ed => "ED",
            DisabilityCategory::Id => "ID",
            DisabilityCategory::Md => "MD",
        }
    }

    pub fn parse(code: &str) -> Result<Self> {
        match code.to_ascii_uppercase().as_str() {
            "SLD" => Ok(DisabilityCategory::Sld),
            "OHI" => Ok(DisabilityCategory::Ohi),
            "AUT" => Ok(DisabilityCategory::Aut),
            "SLI" => Ok(DisabilityCategory::Sli),
            "ED" => Ok(DisabilityCategory::Ed),
            "ID" => Ok(DisabilityCategory::Id),
            "MD" => Ok(DisabilityCategory::Md),
            other => Err(EdPlanError::validation(
                "disability_code",
                format!("Unknown disability code '{}'", other),
            )),
        }
    }
}

impl std::fmt::Display for DisabilityCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// School grade, kindergarten through 12
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Grade(pub u8);

impl Grade {
    pub const KINDERGARTEN: Grade = Grade(0);

    pub fn parse(value: &str) -> Result<Self> {
        let trimmed = value.trim();
        if trimmed.eq_ignore_ascii_case("k") || trimmed.eq_ignore_ascii_case("kindergarten") {
            return Ok(Grade::KINDERGARTEN);
        }
        let number: u8 = trimmed.parse().map_err(|_| {
            EdPlanError::validation("grade", format!("Unparseable grade '{}'", value))
        })?;
        if number > 12 {
            return Err(EdPlanError::validation(
                "grade",
                format!("Grade {} out of range (K-12)", number),
            ));
        }
        Ok(Grade(number))
    }

    pub fn band(&self) -> GradeBand {
        GradeBand::from_grade(*self)
    }
}

impl std::fmt::Display for Grade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0 == 0 {
            write!(f, "K")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// Grade bands used for template selection and exemplar retrieval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GradeBand {
    K2,
    Elementary35,
    Middle68,
    High912,
}

impl GradeBand {
    pub fn from_grade(grade: Grade) -> Self {
        match grade.0 {
            0..=2 => GradeBand::K2,
            3..=5 => GradeBand::Elementary35,
            6..=8 => GradeBand::Middle68,
            _ => GradeBand::High912,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            GradeBand::K2 => "K-2",
            GradeBand::Elementary35 => "3-5",
            GradeBand::Middle68 => "6-8",
            GradeBand::High912 => "9-12",
        }
    }
}

/// Student entity, owned by the external CRUD service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Student {
    pub id: StudentId,
    /// External district-assigned identifier
    pub external_id: String,
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: NaiveDate,
    pub grade: Grade,
    pub school_district: String,
    pub school_name: String,
    pub disability_codes: Vec<DisabilityCategory>,
    pub enrollment_date: NaiveDate,
    pub created_at: DateTime<Utc>,
}

impl Student {
    pub fn new(
        external_id: String,
        first_name: String,
        last_name: String,
        date_of_birth: NaiveDate,
        grade: Grade,
        school_district: String,
        school_name: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            external_id,
            first_name,
            last_name,
            date_of_birth,
            grade,
            school_district,
            school_name,
            disability_codes: Vec::new(),
            enrollment_date: Utc::now().date_naive(),
            created_at: Utc::now(),
        }
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    /// Primary disability category drives template selection
    pub fn primary_disability(&self) -> Option<DisabilityCategory> {
        self.disability_codes.first().copied()
    }
}

/// Repository trait for students
#[async_trait::async_trait]
pub trait StudentRepository: Send + Sync {
    async fn insert(&self, student: Student) -> Result<StudentId>;
    async fn get(&self, id: StudentId) -> Result<Option<Student>>;
    async fn get_by_external_id(&self, external_id: &str) -> Result<Option<Student>>;
    async fn list(&self) -> Result<Vec<Student>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grade_parsing() {
        assert_eq!(Grade::parse("K").unwrap(), Grade::KINDERGARTEN);
        assert_eq!(Grade::parse("kindergarten").unwrap(), Grade(0));
        assert_eq!(Grade::parse("5").unwrap(), Grade(5));
        assert_eq!(Grade::parse(" 12 ").unwrap(), Grade(12));
        assert!(Grade::parse("13").is_err());
        assert!(Grade::parse("fifth").is_err());
    }

    #[test]
    fn test_grade_bands() {
        assert_eq!(Grade(1).band(), GradeBand::K2);
        assert_eq!(Grade(5).band(), GradeBand::Elementary35);
        assert_eq!(Grade(7).band(), GradeBand::Middle68);
        assert_eq!(Grade(12).band(), GradeBand::High912);
    }

    #[test]
    fn test_disability_code_round_trip() {
        for code in ["SLD", "OHI", "AUT", "SLI", "ED", "ID", "MD"] {
            assert_eq!(DisabilityCategory::parse(code).unwrap().code(), code);
        }
        assert!(DisabilityCategory::parse("XYZ").is_err());
    }
}
