use crate::types::{FieldMeta, FieldValue, Role, ValueKind};

/// Static description of a canonical code.
#[derive(Debug)]
pub struct CodeSpec {
    pub code: &'static str,
    pub name: &'static str,
    pub kind: ValueKind,
    pub role: Role,
    pub unit: &'static str,
    pub writable: bool,
    /// Wire value is in tenths of the real unit.
    pub tenths: bool,
    /// Clamped to the device's `lower_temp`/`upper_temp` before submission.
    pub clamped: bool,
    pub choices: Option<Choices>,
}

#[derive(Debug)]
pub struct Choices {
    pub allowed: &'static [&'static str],
    pub default: &'static str,
}

pub const TEMP_SET: &str = "temp_set";
pub const TEMP_CURRENT: &str = "temp_current";
pub const UPPER_TEMP: &str = "upper_temp";
pub const LOWER_TEMP: &str = "lower_temp";
pub const MODE: &str = "mode";
pub const CHANGE_SOURCE: &str = "change_source";

const MODE_CHOICES: Choices = Choices {
    allowed: &["auto", "manual", "holiday", "eco", "off"],
    default: "auto",
};

const CHANGE_SOURCE_CHOICES: Choices = Choices {
    allowed: &["remote", "local", "schedule"],
    default: "remote",
};

const fn number(
    code: &'static str,
    name: &'static str,
    role: Role,
    unit: &'static str,
    writable: bool,
    tenths: bool,
) -> CodeSpec {
    CodeSpec {
        code,
        name,
        kind: ValueKind::Number,
        role,
        unit,
        writable,
        tenths,
        clamped: false,
        choices: None,
    }
}

const fn boolean(code: &'static str, name: &'static str) -> CodeSpec {
    CodeSpec {
        code,
        name,
        kind: ValueKind::Boolean,
        role: Role::Switch,
        unit: "",
        writable: true,
        tenths: false,
        clamped: false,
        choices: None,
    }
}

const REGISTRY: &[CodeSpec] = &[
    CodeSpec {
        clamped: true,
        ..number(TEMP_SET, "Target temperature", Role::Temperature, "°C", true, true)
    },
    number(TEMP_CURRENT, "Current temperature", Role::Temperature, "°C", false, true),
    number(UPPER_TEMP, "Upper temperature limit", Role::Temperature, "°C", true, true),
    number(LOWER_TEMP, "Lower temperature limit", Role::Temperature, "°C", true, true),
    number("temp_correction", "Temperature correction", Role::Temperature, "°C", true, true),
    number("humidity", "Humidity", Role::Humidity, "%", false, true),
    number("battery_percentage", "Battery", Role::Battery, "%", false, false),
    boolean("switch", "Power"),
    boolean("child_lock", "Child lock"),
    boolean("eco", "Eco mode"),
    boolean("window_check", "Open window detection"),
    boolean("frost", "Frost protection"),
    CodeSpec {
        code: MODE,
        name: "Mode",
        kind: ValueKind::String,
        role: Role::EnumText,
        unit: "",
        writable: true,
        tenths: false,
        clamped: false,
        choices: Some(MODE_CHOICES),
    },
    CodeSpec {
        code: CHANGE_SOURCE,
        name: "Change source",
        kind: ValueKind::String,
        role: Role::EnumText,
        unit: "",
        writable: true,
        tenths: false,
        clamped: false,
        choices: Some(CHANGE_SOURCE_CHOICES),
    },
    CodeSpec {
        code: "work_state",
        name: "Work state",
        kind: ValueKind::String,
        role: Role::Indicator,
        unit: "",
        writable: false,
        tenths: false,
        clamped: false,
        choices: None,
    },
];

/// Vendor spellings, matched case-insensitively.
const CODE_ALIASES: &[(&str, &str)] = &[
    ("tempset", TEMP_SET),
    ("temp_set_c", TEMP_SET),
    ("set_temp", TEMP_SET),
    ("target_temp", TEMP_SET),
    ("cur_temp", TEMP_CURRENT),
    ("current_temp", TEMP_CURRENT),
    ("temp_current_c", TEMP_CURRENT),
    ("tempcurrent", TEMP_CURRENT),
    ("max_temp", UPPER_TEMP),
    ("temp_max", UPPER_TEMP),
    ("upper_temp_c", UPPER_TEMP),
    ("min_temp", LOWER_TEMP),
    ("temp_min", LOWER_TEMP),
    ("lower_temp_c", LOWER_TEMP),
    ("temp_calibration", "temp_correction"),
    ("hum", "humidity"),
    ("humidity_value", "humidity"),
    ("battery", "battery_percentage"),
    ("va_battery", "battery_percentage"),
    ("battery_state", "battery_percentage"),
    ("lock", "child_lock"),
    ("childlock", "child_lock"),
    ("work_mode", MODE),
    ("workmode", MODE),
    ("switch_1", "switch"),
    ("power", "switch"),
    ("eco_mode", "eco"),
    ("changesource", CHANGE_SOURCE),
];

const MODE_ALIASES: &[(&str, &str)] = &[
    ("automatic", "auto"),
    ("program", "auto"),
    ("smart", "auto"),
    ("schedule", "auto"),
    ("hand", "manual"),
    ("manu", "manual"),
    ("hold", "manual"),
    ("away", "holiday"),
    ("vacation", "holiday"),
    ("energy_saving", "eco"),
    ("energy", "eco"),
];

fn lookup(table: &[(&str, &'static str)], key: &str) -> Option<&'static str> {
    table
        .iter()
        .find(|(alias, _)| alias.eq_ignore_ascii_case(key))
        .map(|(_, canonical)| *canonical)
}

/// Map a raw vendor code to its canonical form. Unknown codes come back trimmed.
pub fn normalize_code(raw: &str) -> String {
    let trimmed = raw.trim();
    if let Some(spec) = REGISTRY.iter().find(|s| s.code.eq_ignore_ascii_case(trimmed)) {
        return spec.code.to_string();
    }
    lookup(CODE_ALIASES, trimmed)
        .map(str::to_string)
        .unwrap_or_else(|| trimmed.to_string())
}

/// Map a raw mode value to its canonical form. Unknown modes come back trimmed.
pub fn normalize_mode(raw: &str) -> String {
    let trimmed = raw.trim();
    if let Some(known) = MODE_CHOICES
        .allowed
        .iter()
        .find(|m| m.eq_ignore_ascii_case(trimmed))
    {
        return known.to_string();
    }
    lookup(MODE_ALIASES, trimmed)
        .map(str::to_string)
        .unwrap_or_else(|| trimmed.to_string())
}

pub fn spec(code: &str) -> Option<&'static CodeSpec> {
    REGISTRY.iter().find(|s| s.code == code)
}

pub fn is_writable(code: &str) -> bool {
    spec(code).is_some_and(|s| s.writable)
}

pub fn is_tenths(code: &str) -> bool {
    spec(code).is_some_and(|s| s.tenths)
}

pub fn is_temperature(code: &str) -> bool {
    spec(code).is_some_and(|s| s.role.is_temperature())
}

/// Metadata for a field. Unknown codes are read-only and generic, typed after
/// the observed value.
pub fn field_meta(code: &str, value: &FieldValue) -> FieldMeta {
    match spec(code) {
        Some(s) => FieldMeta {
            name: s.name.to_string(),
            kind: s.kind,
            role: s.role,
            unit: s.unit.to_string(),
            writable: s.writable,
        },
        None => FieldMeta {
            name: code.to_string(),
            kind: value.kind(),
            role: Role::Generic,
            unit: String::new(),
            writable: false,
        },
    }
}
