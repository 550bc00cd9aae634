/// High-level category of a SQL statement, inferred from its leading keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryType {
    Select,
    Ddl,
    Other,
}

impl QueryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Select => "select",
            Self::Ddl => "ddl",
            Self::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "select" => Some(Self::Select),
            "ddl" => Some(Self::Ddl),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

impl std::fmt::Display for QueryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Classify a SQL text by its first keyword.
///
/// `WITH` counts as select since CTEs resolve to a query. Statements that
/// define or drop objects count as DDL; everything else (DML, SHOW, USE, ...)
/// is `Other`.
pub fn classify_query(sql: &str) -> QueryType {
    let keyword = sql
        .trim_start()
        .split(|c: char| c.is_whitespace() || c == '(')
        .find(|s| !s.is_empty())
        .unwrap_or("")
        .to_ascii_uppercase();

    match keyword.as_str() {
        "SELECT" | "WITH" => QueryType::Select,
        "CREATE" | "ALTER" | "DROP" | "TRUNCATE" | "GRANT" | "REVOKE" | "COMMENT" => {
            QueryType::Ddl
        }
        _ => QueryType::Other,
    }
}
