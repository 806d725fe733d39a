//! Static record schemas.
//!
//! Every record type declares its telemetry layout once, through
//! [`metric_record!`](crate::metric_record). The macro generates the struct,
//! its [`Record`] impl and a [`FromRow`](crate::executor::FromRow) impl that
//! reads each field from the column with the same name.

use crate::sink::{FieldValue, ValueKind};

/// Telemetry layout of one record field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    /// `None` excludes the field from ingestion.
    pub kind: Option<ValueKind>,
}

impl FieldSpec {
    pub const fn gauge(name: &'static str) -> Self {
        Self {
            name,
            kind: Some(ValueKind::Gauge),
        }
    }

    pub const fn attribute(name: &'static str) -> Self {
        Self {
            name,
            kind: Some(ValueKind::Attribute),
        }
    }

    pub const fn skip(name: &'static str) -> Self {
        Self { name, kind: None }
    }
}

/// A typed row that can be turned into one metric set.
pub trait Record: Sized + Send + Sync + 'static {
    /// Field layout, in declaration order.
    fn schema() -> &'static [FieldSpec];

    /// Field values aligned with [`schema`](Record::schema). `None` is unset.
    fn field_values(&self) -> Vec<Option<FieldValue<'_>>>;
}

/// Borrowing conversion of a field into a [`FieldValue`].
pub trait ToFieldValue {
    fn to_field_value(&self) -> Option<FieldValue<'_>>;
}

impl ToFieldValue for String {
    fn to_field_value(&self) -> Option<FieldValue<'_>> {
        Some(FieldValue::Text(self.as_str()))
    }
}

impl ToFieldValue for i64 {
    fn to_field_value(&self) -> Option<FieldValue<'_>> {
        Some(FieldValue::Int(*self))
    }
}

impl ToFieldValue for f64 {
    fn to_field_value(&self) -> Option<FieldValue<'_>> {
        Some(FieldValue::Float(*self))
    }
}

impl ToFieldValue for bool {
    fn to_field_value(&self) -> Option<FieldValue<'_>> {
        Some(FieldValue::Bool(*self))
    }
}

impl<T: ToFieldValue> ToFieldValue for Option<T> {
    fn to_field_value(&self) -> Option<FieldValue<'_>> {
        self.as_ref().and_then(ToFieldValue::to_field_value)
    }
}

/// Declares a record struct together with its telemetry schema.
///
/// ```ignore
/// metric_record! {
///     pub struct Sample {
///         pub query_id: Option<String> => attribute("query_id"),
///         pub calls: Option<i64> => gauge("execution_count"),
///         pub raw_text: Option<String> => skip,
///     }
/// }
/// ```
#[macro_export]
macro_rules! metric_record {
    (@spec $field:ident gauge $name:literal) => {
        $crate::ingest::FieldSpec::gauge($name)
    };
    (@spec $field:ident attribute $name:literal) => {
        $crate::ingest::FieldSpec::attribute($name)
    };
    (@spec $field:ident skip) => {
        $crate::ingest::FieldSpec::skip(stringify!($field))
    };
    (
        $(#[$meta:meta])*
        $vis:vis struct $ty_name:ident {
            $(
                $(#[$fmeta:meta])*
                $fvis:vis $field:ident : $ty:ty => $kind:ident $( ( $name:literal ) )?
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq)]
        $vis struct $ty_name {
            $(
                $(#[$fmeta])*
                $fvis $field: $ty,
            )*
        }

        impl $crate::ingest::Record for $ty_name {
            fn schema() -> &'static [$crate::ingest::FieldSpec] {
                const SCHEMA: &[$crate::ingest::FieldSpec] = &[
                    $( $crate::metric_record!(@spec $field $kind $( $name )?) ),*
                ];
                SCHEMA
            }

            fn field_values(&self) -> Vec<Option<$crate::sink::FieldValue<'_>>> {
                use $crate::ingest::ToFieldValue;
                vec![ $( self.$field.to_field_value() ),* ]
            }
        }

        impl $crate::executor::FromRow for $ty_name {
            fn from_row(
                row: &$crate::executor::Row,
            ) -> Result<Self, $crate::error::QpmError> {
                Ok(Self {
                    $(
                        $field: <$ty as $crate::executor::FromColumn>::from_column(
                            row,
                            stringify!($field),
                        )?,
                    )*
                })
            }
        }
    };
}
