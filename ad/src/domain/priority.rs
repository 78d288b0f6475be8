//! Priority classes for attachment downloads

use serde::{Deserialize, Serialize};

use super::attachment::AttachmentFlags;

/// Urgency tier of a download request
///
/// Variants are declared most urgent first, so the derived ordering sorts
/// ascending by urgency (`Foreground < SendMail < Background`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PriorityClass {
    /// Explicit user request
    Foreground,
    /// Attachment of an outgoing (forwarded) message
    SendMail,
    /// Opportunistic prefetch
    Background,
}

impl PriorityClass {
    /// Most urgent class
    pub const HIGHEST: Self = Self::Foreground;

    /// Least urgent class
    pub const LOWEST: Self = Self::Background;

    /// Derive the priority class from a record's flags.
    ///
    /// Returns `None` when the record is not marked for download, i.e. it is not
    /// eligible for background scheduling.
    pub fn for_flags(flags: AttachmentFlags) -> Option<Self> {
        if flags.contains(AttachmentFlags::DOWNLOAD_FORWARD) {
            Some(Self::SendMail)
        } else if flags.contains(AttachmentFlags::DOWNLOAD_USER_REQUEST) {
            Some(Self::Foreground)
        } else {
            None
        }
    }

    /// Numeric tier, 0 being the most urgent
    pub fn rank(self) -> u8 {
        match self {
            Self::Foreground => 0,
            Self::SendMail => 1,
            Self::Background => 2,
        }
    }
}

impl std::fmt::Display for PriorityClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Foreground => write!(f, "foreground"),
            Self::SendMail => write!(f, "send-mail"),
            Self::Background => write!(f, "background"),
        }
    }
}

impl std::str::FromStr for PriorityClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "foreground" | "0" => Ok(Self::Foreground),
            "send-mail" | "sendmail" | "1" => Ok(Self::SendMail),
            "background" | "2" => Ok(Self::Background),
            _ => Err(format!("Unknown priority class: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ordering() {
        assert!(PriorityClass::Foreground < PriorityClass::SendMail);
        assert!(PriorityClass::SendMail < PriorityClass::Background);
        assert_eq!(PriorityClass::HIGHEST.rank(), 0);
        assert_eq!(PriorityClass::LOWEST.rank(), 2);
    }

    #[test]
    fn test_for_flags() {
        assert_eq!(PriorityClass::for_flags(AttachmentFlags::empty()), None);
        assert_eq!(
            PriorityClass::for_flags(AttachmentFlags::DOWNLOAD_USER_REQUEST),
            Some(PriorityClass::Foreground)
        );
        assert_eq!(
            PriorityClass::for_flags(AttachmentFlags::DOWNLOAD_FORWARD),
            Some(PriorityClass::SendMail)
        );

        // Forward wins over a user request
        let both = AttachmentFlags::DOWNLOAD_FORWARD | AttachmentFlags::DOWNLOAD_USER_REQUEST;
        assert_eq!(PriorityClass::for_flags(both), Some(PriorityClass::SendMail));

        // Policy flag alone does not make a record schedulable
        assert_eq!(PriorityClass::for_flags(AttachmentFlags::POLICY_DISALLOWS_DOWNLOAD), None);
    }

    #[test]
    fn test_priority_display_and_parse() {
        assert_eq!(PriorityClass::SendMail.to_string(), "send-mail");
        assert_eq!("FOREGROUND".parse::<PriorityClass>().unwrap(), PriorityClass::Foreground);
        assert_eq!("2".parse::<PriorityClass>().unwrap(), PriorityClass::Background);
        assert!("urgent".parse::<PriorityClass>().is_err());
    }

    #[test]
    fn test_priority_serde() {
        let json = serde_json::to_string(&PriorityClass::SendMail).unwrap();
        assert_eq!(json, "\"send-mail\"");

        let priority: PriorityClass = serde_json::from_str("\"background\"").unwrap();
        assert_eq!(priority, PriorityClass::Background);
    }
}
