//! Relational model of the generated database: types, tables, derived
//! relations and the engine's built-in routines.

use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlType {
    Numeric,
    Real,
    Int,
    Text,
    Blob,
    Bool,
    Null,
    Date,
    Time,
    DateTime,
    /// Repeat the following argument type zero or more times.
    Multi,
    TimeValue,
    TimeModifier,
    /// A single unicode code point.
    Rune,
    Any,
    /// A real number in [0.0, 1.0).
    Real01,
}

impl SqlType {
    /// Every type a column may be declared with.
    pub const CONCRETE: [SqlType; 10] = [
        SqlType::Numeric,
        SqlType::Real,
        SqlType::Int,
        SqlType::Text,
        SqlType::Blob,
        SqlType::Bool,
        SqlType::Null,
        SqlType::Date,
        SqlType::Time,
        SqlType::DateTime,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SqlType::Numeric => "NUMERIC",
            SqlType::Real => "REAL",
            SqlType::Int => "INTEGER",
            SqlType::Text => "TEXT",
            SqlType::Blob => "BLOB",
            SqlType::Bool => "BOOLEAN",
            SqlType::Null => "NULL",
            SqlType::Date => "DATE",
            SqlType::Time => "TIME",
            SqlType::DateTime => "DATETIME",
            SqlType::Multi => "MULTI",
            SqlType::TimeValue => "TIMEVALUE",
            SqlType::TimeModifier => "TIMEMODIFIER",
            SqlType::Rune => "RUNE",
            SqlType::Any => "ANY",
            SqlType::Real01 => "REAL01",
        }
    }

    pub fn is_concrete(&self) -> bool {
        Self::CONCRETE.contains(self)
    }

    /// Types with a total order usable with `<`, `>`, `<=`, `>=`.
    pub fn is_ordered(&self) -> bool {
        matches!(
            self,
            SqlType::Int
                | SqlType::Real
                | SqlType::Numeric
                | SqlType::Date
                | SqlType::Time
                | SqlType::DateTime
                | SqlType::Text
                | SqlType::Blob
        )
    }
}

impl fmt::Display for SqlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub ty: SqlType,
}

impl Column {
    pub fn new(name: impl Into<String>, ty: SqlType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// Anything with a name and an ordered column list.
pub trait Relation: fmt::Debug + Send + Sync {
    fn name(&self) -> &str;
    fn columns(&self) -> &[Column];

    /// Only base tables can be the target of INSERT, UPDATE or DELETE.
    fn as_table(&self) -> Option<&Table> {
        None
    }
}

#[derive(Debug, Clone)]
pub struct Table {
    name: String,
    columns: Vec<Column>,
    defaults: Vec<Option<String>>,
    pub is_temp: bool,
    pub if_not_exists: bool,
}

impl Table {
    pub fn new(name: impl Into<String>, columns: Vec<Column>) -> Self {
        let defaults = vec![None; columns.len()];
        Self {
            name: name.into(),
            columns,
            defaults,
            is_temp: false,
            if_not_exists: false,
        }
    }

    /// `defaults[i]` is the literal default of `columns[i]`, if any.
    pub fn with_defaults(mut self, defaults: Vec<Option<String>>) -> Self {
        debug_assert_eq!(defaults.len(), self.columns.len());
        self.defaults = defaults;
        self
    }

    pub fn default_of(&self, idx: usize) -> Option<&str> {
        self.defaults.get(idx).and_then(|d| d.as_deref())
    }

    pub fn out(&self) -> String {
        // is_temp and if_not_exists are recorded but not rendered
        let mut sql = format!("CREATE TABLE {} (\n", self.name);
        for (i, col) in self.columns.iter().enumerate() {
            sql.push_str("    ");
            sql.push_str(&col.name);
            sql.push(' ');
            sql.push_str(col.ty.as_str());
            if let Some(default) = self.default_of(i) {
                sql.push_str(" DEFAULT ");
                sql.push_str(default);
            }
            if i + 1 < self.columns.len() {
                sql.push(',');
            }
            sql.push('\n');
        }
        sql.push(')');
        sql
    }
}

impl Relation for Table {
    fn name(&self) -> &str {
        &self.name
    }

    fn columns(&self) -> &[Column] {
        &self.columns
    }

    fn as_table(&self) -> Option<&Table> {
        Some(self)
    }
}

/// Row-set introduced by an alias, subquery or CTE. Lives as long as the
/// statement tree that introduced it.
#[derive(Debug, Clone)]
pub struct AliasedRelation {
    pub alias: String,
    pub columns: Vec<Column>,
}

impl AliasedRelation {
    pub fn new(alias: impl Into<String>, columns: Vec<Column>) -> Self {
        Self {
            alias: alias.into(),
            columns,
        }
    }
}

impl Relation for AliasedRelation {
    fn name(&self) -> &str {
        &self.alias
    }

    fn columns(&self) -> &[Column] {
        &self.columns
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Routine {
    pub name: &'static str,
    pub arg_types: &'static [SqlType],
    pub ret: SqlType,
}

const fn routine(name: &'static str, arg_types: &'static [SqlType], ret: SqlType) -> Routine {
    Routine {
        name,
        arg_types,
        ret,
    }
}

#[derive(Debug, Default)]
pub struct Schema {
    /// Optional schema qualifier used by ANALYZE and VACUUM.
    pub name: Option<String>,
    pub tables: Vec<Arc<Table>>,
    pub routines: Vec<&'static Routine>,
    pub aggregates: Vec<&'static Routine>,
}

impl Schema {
    pub fn out(&self) -> String {
        let mut sql = String::new();
        for (i, table) in self.tables.iter().enumerate() {
            if i > 0 {
                sql.push_str("\n\n");
            }
            sql.push_str(&table.out());
            sql.push(';');
        }
        sql
    }

    pub fn relations(&self) -> Vec<Arc<dyn Relation>> {
        self.tables
            .iter()
            .map(|t| Arc::clone(t) as Arc<dyn Relation>)
            .collect()
    }
}

const NON_DETERMINISTIC: &[&str] = &[
    "random",
    "randomblob",
    "sqlite_source_id",
    "sqlite_version",
    "total_changes",
    "sqlite_offset",
    "sqlite_compileoption_get",
    "sqlite_compileoption_used",
    "load_extension",
    "date",
    "time",
    "datetime",
    "julianday",
    "strftime",
];

/// Drops routines whose output varies between runs or engine builds.
pub fn remove_non_deterministic(routines: &[&'static Routine]) -> Vec<&'static Routine> {
    routines
        .iter()
        .copied()
        .filter(|r| !NON_DETERMINISTIC.contains(&r.name))
        .collect()
}

use SqlType::{Any, Blob, Int, Multi, Real, Real01, Rune, Text, TimeModifier, TimeValue};

pub static BUILTIN_AGGREGATES: &[Routine] = &[
    routine("avg", &[Int], Int),
    routine("avg", &[Real], Real),
    routine("count", &[Real], Int),
    routine("count", &[Text], Int),
    routine("count", &[Int], Int),
    // count(*)
    routine("count", &[], Int),
    routine("group_concat", &[Text], Text),
    routine("group_concat", &[Text, Text], Text),
    routine("string_agg", &[Text, Text], Text),
    routine("max", &[Real], Real),
    routine("max", &[Int], Int),
    routine("max", &[Text], Text),
    routine("min", &[Real], Real),
    routine("min", &[Int], Int),
    routine("min", &[Text], Text),
    routine("sum", &[Real], Real),
    routine("sum", &[Int], Int),
    routine("total", &[Real], Real),
    routine("total", &[Int], Real),
];

pub static BUILTIN_FUNCTIONS: &[Routine] = &[
    // core
    routine("abs", &[Any], Real),
    routine("round", &[Any], Real),
    routine("round", &[Any, Any], Real),
    routine("max", &[Any, Any, Multi, Any], Real),
    routine("min", &[Any, Any, Multi, Any], Real),
    routine("char", &[Multi, Rune], Text),
    routine("hex", &[Any], Text),
    routine("instr", &[Any, Any], Int),
    routine("length", &[Any], Int),
    routine("like", &[Any, Any], Int),
    // the escape argument must be a single character
    routine("like", &[Any, Any, Rune], Int),
    routine("lower", &[Any], Text),
    routine("ltrim", &[Any], Text),
    routine("ltrim", &[Any, Any], Text),
    routine("printf", &[Text, Multi, Any], Text),
    routine("quote", &[Any], Text),
    routine("replace", &[Any, Any, Any], Text),
    routine("rtrim", &[Any], Text),
    routine("rtrim", &[Any, Any], Text),
    routine("substr", &[Any, Any], Text),
    routine("substr", &[Any, Any, Any], Text),
    routine("trim", &[Any], Text),
    routine("trim", &[Any, Any], Text),
    routine("unicode", &[Any], Int),
    routine("upper", &[Any], Text),
    routine("coalesce", &[Any, Any, Multi, Any], Text),
    routine("ifnull", &[Any, Any], Text),
    routine("nullif", &[Any, Any], Text),
    routine("likelihood", &[Any, Real01], Int),
    routine("likely", &[Any], Int),
    routine("unlikely", &[Any], Int),
    routine("typeof", &[Any], Text),
    routine("glob", &[Any, Any], Int),
    routine("changes", &[], Int),
    routine("last_insert_rowid", &[], Int),
    routine("random", &[], Int),
    routine("randomblob", &[Int], Blob),
    routine("sqlite_compileoption_get", &[Int], Text),
    routine("sqlite_compileoption_used", &[Text], Int),
    routine("sqlite_source_id", &[], Text),
    routine("sqlite_version", &[], Text),
    routine("total_changes", &[], Int),
    routine("zeroblob", &[Int], Blob),
    // datetime
    routine("date", &[], Text),
    routine("date", &[TimeValue, Multi, TimeModifier], Text),
    routine("time", &[], Text),
    routine("time", &[TimeValue, Multi, TimeModifier], Text),
    routine("datetime", &[], Text),
    routine("datetime", &[TimeValue, Multi, TimeModifier], Text),
    routine("julianday", &[], Real),
    routine("julianday", &[TimeValue, Multi, TimeModifier], Real),
    routine("strftime", &[Text], Text),
    routine("strftime", &[Text, TimeValue], Text),
    routine("strftime", &[Text, TimeValue, Multi, TimeModifier], Text),
];

/// Time-value shapes accepted by the date and time functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeValueShape {
    /// `YYYY-MM-DD`
    Date,
    DateHm,
    DateHms,
    DateHmsMs,
    /// `YYYY-MM-DDTHH:MM`
    DateTHm,
    DateTHms,
    DateTHmsMs,
    Hm,
    Hms,
    HmsMs,
    Now,
    /// A julian day number.
    JulianDay,
}

impl TimeValueShape {
    pub const ALL: [TimeValueShape; 12] = [
        TimeValueShape::Date,
        TimeValueShape::DateHm,
        TimeValueShape::DateHms,
        TimeValueShape::DateHmsMs,
        TimeValueShape::DateTHm,
        TimeValueShape::DateTHms,
        TimeValueShape::DateTHmsMs,
        TimeValueShape::Hm,
        TimeValueShape::Hms,
        TimeValueShape::HmsMs,
        TimeValueShape::Now,
        TimeValueShape::JulianDay,
    ];
}

/// Modifiers that may follow a time value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModifierShape {
    Days,
    Hours,
    Minutes,
    Seconds,
    Months,
    Years,
    ShiftHm,
    ShiftHms,
    ShiftHmsMs,
    ShiftDate,
    ShiftDateHm,
    ShiftDateHms,
    ShiftDateHmsMs,
    Ceiling,
    Floor,
    StartOfMonth,
    StartOfYear,
    StartOfDay,
    Weekday,
    JulianDay,
    Auto,
    LocalTime,
    Utc,
    Subsec,
    Subsecond,
}

impl ModifierShape {
    pub const ALL: [ModifierShape; 25] = [
        ModifierShape::Days,
        ModifierShape::Hours,
        ModifierShape::Minutes,
        ModifierShape::Seconds,
        ModifierShape::Months,
        ModifierShape::Years,
        ModifierShape::ShiftHm,
        ModifierShape::ShiftHms,
        ModifierShape::ShiftHmsMs,
        ModifierShape::ShiftDate,
        ModifierShape::ShiftDateHm,
        ModifierShape::ShiftDateHms,
        ModifierShape::ShiftDateHmsMs,
        ModifierShape::Ceiling,
        ModifierShape::Floor,
        ModifierShape::StartOfMonth,
        ModifierShape::StartOfYear,
        ModifierShape::StartOfDay,
        ModifierShape::Weekday,
        ModifierShape::JulianDay,
        ModifierShape::Auto,
        ModifierShape::LocalTime,
        ModifierShape::Utc,
        ModifierShape::Subsec,
        ModifierShape::Subsecond,
    ];

    /// The only modifiers meaningful after a numeric time value.
    pub const NUMERIC_ONLY: [ModifierShape; 4] = [
        ModifierShape::JulianDay,
        ModifierShape::Auto,
        ModifierShape::LocalTime,
        ModifierShape::Utc,
    ];

    /// Text of modifiers that take no numbers.
    pub fn keyword(&self) -> Option<&'static str> {
        match self {
            ModifierShape::Ceiling => Some("'ceiling'"),
            ModifierShape::Floor => Some("'floor'"),
            ModifierShape::StartOfMonth => Some("'start of month'"),
            ModifierShape::StartOfYear => Some("'start of year'"),
            ModifierShape::StartOfDay => Some("'start of day'"),
            ModifierShape::JulianDay => Some("'julianday'"),
            ModifierShape::Auto => Some("'auto'"),
            ModifierShape::LocalTime => Some("'localtime'"),
            ModifierShape::Utc => Some("'utc'"),
            ModifierShape::Subsec => Some("'subsec'"),
            ModifierShape::Subsecond => Some("'subsecond'"),
            _ => None,
        }
    }
}
