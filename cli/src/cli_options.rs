use serde::Serialize;

/// Output format for the CLI's pretty-printed config/batch echoes.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub enum Format {
    Yaml,
    Json,
}

impl Format {
    pub fn parse(raw: &str) -> Format {
        match raw.to_ascii_lowercase().as_str() {
            "json" => Format::Json,
            _ => Format::Yaml,
        }
    }

    pub fn to_string_pretty<T: Serialize>(&self, value: &T) -> String {
        match self {
            Format::Yaml => serde_yaml::to_string(value).unwrap_or_else(|e| format!("<yaml error: {e}>")),
            Format::Json => serde_json::to_string_pretty(value).unwrap_or_else(|e| format!("<json error: {e}>")),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CliOptions {
    debug: bool,
    format: Format,
}

impl CliOptions {
    pub fn new(debug: bool, format: Format) -> Self {
        CliOptions { debug, format }
    }

    pub fn is_debug(&self) -> bool {
        self.debug
    }

    pub fn format(&self) -> Format {
        self.format
    }
}

impl Default for CliOptions {
    fn default() -> Self {
        CliOptions::new(false, Format::Yaml)
    }
}
