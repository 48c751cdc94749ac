//! Operator and stage names with their query roles

/// How an operator contributes to index selection. Declaration order is the ESR precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum QueryRole {
    Equality,
    Sort,
    Range,
    Union,
    Irrelevant,
}

macro_rules! names {
    ($($variant:ident => $canonical:literal, $role:ident;)*) => {
        /// Every operator, stage or accumulator name the dialects recognize.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum Name {
            $($variant,)*
        }

        impl Name {
            pub const ALL: &'static [Name] = &[$(Name::$variant,)*];

            pub fn canonical(&self) -> &'static str {
                match self {
                    $(Name::$variant => $canonical,)*
                }
            }

            pub fn query_role(&self) -> QueryRole {
                match self {
                    $(Name::$variant => QueryRole::$role,)*
                }
            }
        }
    };
}

names! {
    All => "all", Irrelevant;
    And => "and", Irrelevant;
    BitsAllClear => "bitsAllClear", Irrelevant;
    BitsAllSet => "bitsAllSet", Irrelevant;
    BitsAnyClear => "bitsAnyClear", Irrelevant;
    BitsAnySet => "bitsAnySet", Irrelevant;
    Combine => "combine", Irrelevant;
    ElemMatch => "elemMatch", Irrelevant;
    Eq => "eq", Equality;
    Exists => "exists", Irrelevant;
    GeoIntersects => "geoIntersects", Range;
    GeoWithin => "geoWithin", Range;
    GeoWithinBox => "geoWithinBox", Range;
    GeoWithinCenter => "geoWithinCenter", Range;
    GeoWithinCenterSphere => "geoWithinCenterSphere", Range;
    GeoWithinPolygon => "geoWithinPolygon", Range;
    Gt => "gt", Range;
    Gte => "gte", Range;
    In => "in", Range;
    Inc => "inc", Irrelevant;
    Lt => "lt", Range;
    Lte => "lte", Range;
    Ne => "ne", Range;
    Near => "near", Range;
    NearSphere => "nearSphere", Range;
    Nin => "nin", Range;
    Nor => "nor", Union;
    Not => "not", Irrelevant;
    Or => "or", Union;
    Regex => "regex", Range;
    Set => "set", Irrelevant;
    SetOnInsert => "setOnInsert", Irrelevant;
    Size => "size", Irrelevant;
    Text => "text", Range;
    Type => "type", Irrelevant;
    Unset => "unset", Irrelevant;
    Match => "match", Irrelevant;
    Project => "project", Irrelevant;
    Include => "include", Irrelevant;
    Exclude => "exclude", Irrelevant;
    Sort => "sort", Sort;
    Ascending => "ascending", Sort;
    Descending => "descending", Sort;
    Group => "group", Irrelevant;
    Sum => "sum", Irrelevant;
    Avg => "avg", Irrelevant;
    First => "first", Irrelevant;
    Last => "last", Irrelevant;
    Top => "top", Irrelevant;
    TopN => "topN", Irrelevant;
    Bottom => "bottom", Irrelevant;
    BottomN => "bottomN", Irrelevant;
    Max => "max", Sort;
    Min => "min", Sort;
    Push => "push", Irrelevant;
    Pull => "pull", Irrelevant;
    PullAll => "pullAll", Irrelevant;
    Pop => "pop", Irrelevant;
    AddToSet => "addToSet", Irrelevant;
    AddFields => "addFields", Irrelevant;
    Unwind => "unwind", Irrelevant;
    Limit => "limit", Irrelevant;
    Merge => "merge", Irrelevant;
    Out => "out", Irrelevant;
    Unknown => "<unknown operator>", Irrelevant;
}

impl Name {
    /// Resolves a method or operator name, with or without a leading `$`.
    pub fn from_canonical(canonical: &str) -> Name {
        let trimmed = canonical.trim_start_matches('$');
        Name::ALL
            .iter()
            .copied()
            .find(|name| name.canonical() == trimmed)
            .unwrap_or(Name::Unknown)
    }

    /// Stages that write data and must never run as part of an explain.
    pub fn is_destructive_stage(&self) -> bool {
        matches!(self, Name::Merge | Name::Out)
    }
}

/// The operation a node performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Named {
    pub name: Name,
}

impl Named {
    pub fn new(name: Name) -> Self {
        Self { name }
    }
}
