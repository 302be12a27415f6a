//! Class roster types pushed to the device.

use serde::{Deserialize, Serialize};

/// A student entry in a class roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Student {
    /// Roll number within the class.
    pub roll: u32,
    /// Student name.
    pub name: String,
}

/// One class in the roster pushed to the device.
///
/// The wire form is a JSON array of these objects. The device stores the
/// roster verbatim and walks it during attendance taking, so `id` must be
/// unique across the pushed list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassRoster {
    /// Class identifier, unique across the roster.
    pub id: String,
    /// Display name shown on the device.
    pub name: String,
    /// Students in roll order.
    pub students: Vec<Student>,
}

impl ClassRoster {
    /// Creates a roster entry with no students.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            students: Vec::new(),
        }
    }

    /// Adds a student, keeping the builder flow.
    #[must_use]
    pub fn student(mut self, roll: u32, name: impl Into<String>) -> Self {
        self.students.push(Student {
            roll,
            name: name.into(),
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roster_wire_shape() {
        let roster = vec![
            ClassRoster::new("c1", "Physics").student(1, "Ada").student(2, "Grace"),
            ClassRoster::new("c2", "Chemistry"),
        ];
        let json = serde_json::to_value(&roster).unwrap();

        assert_eq!(json[0]["id"], "c1");
        assert_eq!(json[0]["students"][1]["roll"], 2);
        assert_eq!(json[1]["students"].as_array().unwrap().len(), 0);
    }

    #[test]
    fn test_roster_roundtrip() {
        let roster = ClassRoster::new("c1", "Physics").student(7, "Lin");
        let json = serde_json::to_string(&roster).unwrap();
        let back: ClassRoster = serde_json::from_str(&json).unwrap();
        assert_eq!(back, roster);
    }
}
