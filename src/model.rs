//! Enumerated domain values shared by the handlers.
//!
//! The wire format keeps the original upper-snake labels (`BAIK`,
//! `SEMESTER_1`, `GROUP_A`); parsing rejects anything outside the sets so a
//! raw form string never reaches the database.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DevelopmentLevel {
    Baik,
    Cukup,
    PerluDilatih,
}

impl DevelopmentLevel {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "BAIK" => Some(Self::Baik),
            "CUKUP" => Some(Self::Cukup),
            "PERLU_DILATIH" => Some(Self::PerluDilatih),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Baik => "BAIK",
            Self::Cukup => "CUKUP",
            Self::PerluDilatih => "PERLU_DILATIH",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Semester {
    First,
    Second,
}

impl Semester {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SEMESTER_1" => Some(Self::First),
            "SEMESTER_2" => Some(Self::Second),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::First => "SEMESTER_1",
            Self::Second => "SEMESTER_2",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgeGroup {
    Toddler,
    GroupA,
    GroupB,
}

impl AgeGroup {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "TODDLER" => Some(Self::Toddler),
            "GROUP_A" => Some(Self::GroupA),
            "GROUP_B" => Some(Self::GroupB),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Toddler => "TODDLER",
            Self::GroupA => "GROUP_A",
            Self::GroupB => "GROUP_B",
        }
    }
}
