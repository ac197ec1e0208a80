use std::fmt;
use std::str::FromStr;

/// Opt-in runtime behaviours, selected with `--features`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Features {
    /// Fault on unknown opcodes instead of skipping them
    strict: bool,
}

impl Features {
    pub fn strict(&self) -> bool {
        self.strict
    }

    fn flags(&self) -> [(&'static str, bool); 1] {
        [("strict", self.strict)]
    }
}

impl FromStr for Features {
    type Err = String;
    fn from_str(string: &str) -> Result<Self, Self::Err> {
        let mut features = Self::default();
        for word in string.split(',') {
            let value = match word.trim() {
                "" => continue,
                "strict" => &mut features.strict,
                _ => return Err(format!("Unknown feature '{}'", word)),
            };
            if *value {
                return Err(format!("Cannot specify feature '{}' twice", word));
            }
            *value = true;
        }
        Ok(features)
    }
}

impl fmt::Display for Features {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let enabled: Vec<_> = self
            .flags()
            .into_iter()
            .filter_map(|(name, value)| value.then_some(name))
            .collect();
        write!(f, "{}", enabled.join(","))
    }
}
