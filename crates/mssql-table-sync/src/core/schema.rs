//! Table and column metadata for source and destination tables.

use serde::{Deserialize, Serialize};

use super::identifier::qualify;

/// Table metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    /// Schema name.
    pub schema: String,

    /// Table name.
    pub name: String,

    /// Column definitions in ordinal order.
    pub columns: Vec<Column>,
}

impl Table {
    /// Create a table without columns.
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
            columns: Vec::new(),
        }
    }

    /// Get the fully qualified table name.
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    /// Bracket-quoted `[schema].[name]`.
    pub fn qualified(&self) -> String {
        qualify(&self.schema, &self.name)
    }

    /// Case-insensitive column lookup, matching SQL Server's default collation.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Check if the table has a primary key.
    pub fn has_pk(&self) -> bool {
        self.columns.iter().any(|c| c.is_primary_key)
    }

    /// Identity is the same table when schema and name match.
    pub fn same_as(&self, other: &Table) -> bool {
        self.schema.eq_ignore_ascii_case(&other.schema) && self.name.eq_ignore_ascii_case(&other.name)
    }
}

/// Broad grouping of SQL Server types, used for value coercion and literal quoting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeFamily {
    Text,
    Integer,
    Decimal,
    Float,
    Boolean,
    DateTime,
    DateTimeOffset,
    Date,
    Time,
    Guid,
    Binary,
    Other,
}

/// Column metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    /// Column name.
    pub name: String,

    /// Data type (e.g., "int", "nvarchar", "datetime2").
    pub data_type: String,

    /// Maximum length in bytes for string/binary types (-1 for max).
    pub max_length: i32,

    /// Numeric precision.
    pub precision: i32,

    /// Numeric scale.
    pub scale: i32,

    /// Whether the column allows NULL.
    pub is_nullable: bool,

    /// Whether the column is an identity column.
    pub is_identity: bool,

    /// Whether the column is part of the table's primary key.
    pub is_primary_key: bool,

    /// Column does not exist physically; its value is computed by a table profile.
    #[serde(default)]
    pub is_virtual: bool,

    /// Ordinal position (1-based).
    pub ordinal_pos: i32,
}

impl Column {
    /// A nullable column with default sizing.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            max_length: 0,
            precision: 0,
            scale: 0,
            is_nullable: true,
            is_identity: false,
            is_primary_key: false,
            is_virtual: false,
            ordinal_pos: 0,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.is_primary_key = true;
        self.is_nullable = false;
        self
    }

    pub fn identity(mut self) -> Self {
        self.is_identity = true;
        self
    }

    pub fn with_length(mut self, max_length: i32) -> Self {
        self.max_length = max_length;
        self
    }

    pub fn family(&self) -> TypeFamily {
        type_family(&self.data_type)
    }

    pub fn is_text(&self) -> bool {
        self.family() == TypeFamily::Text
    }

    /// Date-like columns get their condition literals parsed into date values.
    pub fn is_date(&self) -> bool {
        matches!(
            self.family(),
            TypeFamily::DateTime | TypeFamily::DateTimeOffset | TypeFamily::Date
        )
    }

    /// Column type as used in a CREATE TABLE statement.
    pub fn sql_type(&self) -> String {
        format_mssql_type(&self.data_type, self.max_length, self.precision, self.scale)
    }
}

/// Map a SQL Server type name to its [`TypeFamily`].
pub fn type_family(data_type: &str) -> TypeFamily {
    match data_type.to_lowercase().as_str() {
        "char" | "varchar" | "nchar" | "nvarchar" | "text" | "ntext" | "xml" | "sysname" => {
            TypeFamily::Text
        }
        "bigint" | "int" | "smallint" | "tinyint" => TypeFamily::Integer,
        "decimal" | "numeric" | "money" | "smallmoney" => TypeFamily::Decimal,
        "float" | "real" => TypeFamily::Float,
        "bit" => TypeFamily::Boolean,
        "datetime" | "datetime2" | "smalldatetime" => TypeFamily::DateTime,
        "datetimeoffset" => TypeFamily::DateTimeOffset,
        "date" => TypeFamily::Date,
        "time" => TypeFamily::Time,
        "uniqueidentifier" => TypeFamily::Guid,
        "binary" | "varbinary" | "image" | "timestamp" | "rowversion" => TypeFamily::Binary,
        _ => TypeFamily::Other,
    }
}

/// Format an MSSQL type with proper length/precision.
pub fn format_mssql_type(data_type: &str, max_length: i32, precision: i32, scale: i32) -> String {
    let lower = data_type.to_lowercase();
    match lower.as_str() {
        "float" => {
            if precision > 0 {
                format!("float({})", precision)
            } else {
                "float".to_string()
            }
        }

        "decimal" | "numeric" => {
            if precision > 0 {
                format!("{}({}, {})", lower, precision, scale)
            } else {
                format!("{}(18, 0)", lower)
            }
        }

        "datetime2" | "time" | "datetimeoffset" => {
            if scale > 0 {
                format!("{}({})", lower, scale)
            } else {
                lower
            }
        }

        "char" | "varchar" | "nchar" | "nvarchar" => {
            if max_length == -1 {
                format!("{}(max)", lower)
            } else if max_length > 0 {
                // sys.columns reports bytes; n-types store two bytes per character
                let len = if lower.starts_with('n') {
                    (max_length / 2).max(1)
                } else {
                    max_length
                };
                format!("{}({})", lower, len)
            } else {
                format!("{}(255)", lower)
            }
        }

        "binary" | "varbinary" => {
            if max_length == -1 {
                format!("{}(max)", lower)
            } else if max_length > 0 {
                format!("{}({})", lower, max_length)
            } else {
                format!("{}(255)", lower)
            }
        }

        // rowversion values cannot be inserted; stage them as plain binary
        "timestamp" | "rowversion" => "binary(8)".to_string(),

        _ => lower,
    }
}

/// A child table referencing a parent table through a foreign key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyEdge {
    pub child: String,
    pub parent: String,
}

impl ForeignKeyEdge {
    pub fn new(child: impl Into<String>, parent: impl Into<String>) -> Self {
        Self {
            child: child.into(),
            parent: parent.into(),
        }
    }
}

/// One column pair of a foreign key on a destination table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyColumn {
    /// Referencing column on the child table.
    pub column: String,
    pub ref_schema: String,
    pub ref_table: String,
    pub ref_column: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_test_table() -> Table {
        Table {
            schema: "dbo".to_string(),
            name: "Orders".to_string(),
            columns: vec![
                Column::new("OrderID", "int").primary_key().identity(),
                Column::new("CustomerName", "nvarchar").with_length(200),
                Column::new("Created", "datetime2"),
            ],
        }
    }

    #[test]
    fn test_column_lookup_is_case_insensitive() {
        let table = make_test_table();
        assert_eq!(table.column("customername").unwrap().name, "CustomerName");
        assert!(table.column("Missing").is_none());
    }

    #[test]
    fn test_has_pk() {
        let mut table = make_test_table();
        assert!(table.has_pk());
        table.columns[0].is_primary_key = false;
        assert!(!table.has_pk());
    }

    #[test]
    fn test_qualified_name() {
        assert_eq!(make_test_table().qualified(), "[dbo].[Orders]");
        assert_eq!(make_test_table().full_name(), "dbo.Orders");
    }

    #[test]
    fn test_type_family() {
        assert_eq!(type_family("NVARCHAR"), TypeFamily::Text);
        assert_eq!(type_family("bigint"), TypeFamily::Integer);
        assert_eq!(type_family("datetime2"), TypeFamily::DateTime);
        assert_eq!(type_family("uniqueidentifier"), TypeFamily::Guid);
        assert_eq!(type_family("geography"), TypeFamily::Other);
    }

    #[test]
    fn test_is_date() {
        assert!(Column::new("d", "date").is_date());
        assert!(Column::new("d", "datetimeoffset").is_date());
        assert!(!Column::new("d", "time").is_date());
        assert!(!Column::new("d", "nvarchar").is_date());
    }

    #[test]
    fn test_format_mssql_type() {
        assert_eq!(format_mssql_type("nvarchar", 200, 0, 0), "nvarchar(100)");
        assert_eq!(format_mssql_type("nvarchar", -1, 0, 0), "nvarchar(max)");
        assert_eq!(format_mssql_type("varchar", 50, 0, 0), "varchar(50)");
        assert_eq!(format_mssql_type("decimal", 0, 10, 2), "decimal(10, 2)");
        assert_eq!(format_mssql_type("decimal", 0, 0, 0), "decimal(18, 0)");
        assert_eq!(format_mssql_type("datetime2", 0, 0, 7), "datetime2(7)");
        assert_eq!(format_mssql_type("INT", 4, 10, 0), "int");
        assert_eq!(format_mssql_type("rowversion", 8, 0, 0), "binary(8)");
    }
}
