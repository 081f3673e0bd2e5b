//! Minimal reader for the MIT `krb5.conf` profile format.
//!
//! Only what is needed to inspect a provisioned file: sections, `key = value` relations and
//! one level of `name = { ... }` groups. Values are addressed by a path such as
//! `["realms", "EXAMPLE.COM", "kdc"]`; lookups are ASCII case-insensitive.

fn can_skip_line(line: &str) -> bool {
    matches!(line.chars().next(), None | Some('#') | Some(';'))
}

fn section_name(line: &str) -> Option<&str> {
    line.strip_prefix('[')?.strip_suffix(']').map(str::trim)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Krb5Conf {
    values: Vec<(String, String)>,
}

impl Krb5Conf {
    pub fn parse(data: &str) -> Self {
        let mut values = Vec::new();
        let mut section: Option<String> = None;
        let mut group: Option<String> = None;

        for line in data.lines().map(str::trim) {
            if can_skip_line(line) {
                continue;
            }

            if let Some(name) = section_name(line) {
                section = Some(name.to_owned());
                group = None;
                continue;
            }

            // Relations outside of a section are ignored.
            let Some(section) = &section else {
                continue;
            };

            if line == "}" {
                group = None;
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let (key, value) = (key.trim(), value.trim());

            if value == "{" {
                group = Some(key.to_owned());
                continue;
            }

            let path = match &group {
                Some(group) => [section.as_str(), group, key].join("|"),
                None => [section.as_str(), key].join("|"),
            };
            values.push((path, value.to_owned()));
        }

        Self { values }
    }

    /// First value at `path`.
    pub fn get_value(&self, path: &[&str]) -> Option<&str> {
        let path = path.join("|");

        self.values
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(&path))
            .map(|(_, value)| value.as_str())
    }

    /// Every value at `path`, e.g. all `kdc` entries of a realm.
    pub fn get_values(&self, path: &[&str]) -> Vec<&str> {
        let path = path.join("|");

        self.values
            .iter()
            .filter(|(key, _)| key.eq_ignore_ascii_case(&path))
            .map(|(_, value)| value.as_str())
            .collect()
    }
}
