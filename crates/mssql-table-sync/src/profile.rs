//! Table-specific load behavior, looked up by table name.
//!
//! A few well-known tables need more than the generic load: an extra staging
//! column, a source join with computed columns, or a cascade into dependent
//! relation tables when the parent is pruned.

use crate::core::schema::Column;

/// Staging-only column, NULL unless a column mapping targets it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyntheticColumn {
    pub name: &'static str,
    pub data_type: &'static str,
}

impl SyntheticColumn {
    pub fn to_column(self) -> Column {
        Column::new(self.name, self.data_type)
    }
}

/// Source column computed by the profile's source query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComputedColumn {
    pub name: &'static str,
    /// Scalar expression, written against the source alias.
    pub expression: &'static str,
    pub data_type: &'static str,
}

/// Join applied to the source table when any trigger column is mapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceJoin {
    /// Alias given to the source table.
    pub alias: &'static str,
    /// Join clause appended after the aliased table.
    pub join: &'static str,
    pub triggers: &'static [&'static str],
    pub computed: &'static [ComputedColumn],
}

/// Dependent table whose rows go with their parent row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelationTable {
    pub table: &'static str,
    pub alias: &'static str,
    /// `(relation column, parent column)` pairs.
    pub columns: &'static [(&'static str, &'static str)],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableProfile {
    pub table: &'static str,
    pub synthetic_columns: &'static [SyntheticColumn],
    pub source_join: Option<SourceJoin>,
    pub relations: &'static [RelationTable],
}

impl TableProfile {
    /// Synthetic columns not already targeted by a column mapping.
    pub fn synthetic_for(&self, mapped: &[&str]) -> Vec<Column> {
        self.synthetic_columns
            .iter()
            .filter(|s| !mapped.iter().any(|m| m.eq_ignore_ascii_case(s.name)))
            .map(|s| s.to_column())
            .collect()
    }

    /// Computed source column by name.
    pub fn computed_column(&self, name: &str) -> Option<&'static ComputedColumn> {
        self.source_join
            .as_ref()
            .and_then(|j| j.computed.iter().find(|c| c.name.eq_ignore_ascii_case(name)))
    }
}

const ASSORTMENT_PERMISSIONS: TableProfile = TableProfile {
    table: "EcomAssortmentPermissions",
    synthetic_columns: &[SyntheticColumn {
        name: "AssortmentPermissionAccessUserID",
        data_type: "int",
    }],
    source_join: Some(SourceJoin {
        alias: "outerEcomAssortmentPermissions",
        join: "JOIN [AccessUser] ON [AssortmentPermissionAccessUserID] = [AccessUserID]",
        triggers: &[
            "AssortmentPermissionAccessUserID",
            "AssortmentPermissionCustomerNumber",
            "AssortmentPermissionExternalID",
        ],
        computed: &[
            ComputedColumn {
                name: "AssortmentPermissionCustomerNumber",
                expression: "(SELECT [AccessUserCustomerNumber] FROM [AccessUser] JOIN [EcomAssortmentPermissions] ON [AssortmentPermissionAccessUserID] = [AccessUserID] WHERE [AccessUserID] = [outerEcomAssortmentPermissions].[AssortmentPermissionAccessUserID])",
                data_type: "nvarchar",
            },
            ComputedColumn {
                name: "AssortmentPermissionExternalID",
                expression: "(SELECT [AccessUserExternalID] FROM [AccessUser] JOIN [EcomAssortmentPermissions] ON [AssortmentPermissionAccessUserID] = [AccessUserID] WHERE [AccessUserID] = [outerEcomAssortmentPermissions].[AssortmentPermissionAccessUserID])",
                data_type: "nvarchar",
            },
        ],
    }),
    relations: &[],
};

const PRODUCTS: TableProfile = TableProfile {
    table: "EcomProducts",
    synthetic_columns: &[],
    source_join: None,
    relations: &[
        RelationTable {
            table: "EcomProductCategoryFieldValue",
            alias: "pcfv",
            columns: &[
                ("FieldValueProductId", "ProductID"),
                ("FieldValueProductVariantId", "ProductVariantID"),
                ("FieldValueProductLanguageId", "ProductLanguageID"),
            ],
        },
        RelationTable {
            table: "EcomVariantOptionsProductRelation",
            alias: "vopr",
            columns: &[
                ("VariantOptionsProductRelationProductID", "ProductID"),
                ("VariantOptionsProductRelationVariantID", "ProductVariantID"),
            ],
        },
        RelationTable {
            table: "EcomAssortmentItems",
            alias: "ai",
            columns: &[
                ("AssortmentItemProductID", "ProductID"),
                ("AssortmentItemProductVariantID", "ProductVariantID"),
            ],
        },
        RelationTable {
            table: "EcomAssortmentProductRelations",
            alias: "apr",
            columns: &[
                ("AssortmentProductRelationProductID", "ProductID"),
                ("AssortmentProductRelationProductVariantID", "ProductVariantID"),
            ],
        },
    ],
};

static PROFILES: &[TableProfile] = &[ASSORTMENT_PERMISSIONS, PRODUCTS];

/// Profile for a table name (case-insensitive), if one exists.
pub fn profile_for(table: &str) -> Option<&'static TableProfile> {
    PROFILES.iter().find(|p| p.table.eq_ignore_ascii_case(table))
}
