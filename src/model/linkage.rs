//! Language linkages
//!
//! The same header can be indexed once per linkage; versions of different linkages never
//! share macro state or include edges.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkageId {
    C,
    Cpp,
    Fortran,
}

impl LinkageId {
    pub const ALL: [LinkageId; 3] = [LinkageId::C, LinkageId::Cpp, LinkageId::Fortran];

    pub fn name(&self) -> &'static str {
        match self {
            LinkageId::C => "c",
            LinkageId::Cpp => "c++",
            LinkageId::Fortran => "fortran",
        }
    }

    /// Linkage implied by a source file extension; headers have none
    pub fn for_source_extension(extension: &str) -> Option<LinkageId> {
        match extension {
            "c" => Some(LinkageId::C),
            "cc" | "cpp" | "cxx" | "c++" | "C" | "cp" | "mm" => Some(LinkageId::Cpp),
            "f" | "for" | "f77" | "f90" | "f95" | "F" | "F90" => Some(LinkageId::Fortran),
            _ => None,
        }
    }

    /// Whether the C-family directive scanner understands this linkage
    pub fn is_c_family(&self) -> bool {
        matches!(self, LinkageId::C | LinkageId::Cpp)
    }
}

impl fmt::Display for LinkageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for LinkageId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "c" => Ok(LinkageId::C),
            "c++" | "cpp" | "cxx" => Ok(LinkageId::Cpp),
            "fortran" => Ok(LinkageId::Fortran),
            other => Err(format!("unknown linkage: {other}")),
        }
    }
}
