/*!
Primitive types of the [schema](https://iceberg.apache.org/spec/#schemas-and-data-types),
including the format v3 additions: nanosecond timestamps, `variant`, `unknown`
and the geospatial types `geometry(CRS)` and `geography(CRS, ALG)`.
*/

use std::fmt;

use serde::{
    de::{self, IntoDeserializer},
    Deserialize, Deserializer, Serialize,
};

use crate::error::{Error, Result};

/// Default coordinate reference system for geospatial types.
pub const DEFAULT_CRS: &str = "OGC:CRS84";

#[derive(Debug, PartialEq, Eq, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
/// Edge interpolation algorithm for `geography` values.
pub enum EdgeAlgorithm {
    /// Edges are interpolated as geodesics on a sphere.
    #[default]
    Spherical,
    /// Vincenty's formulae on an ellipsoid.
    Vincenty,
    /// Thomas's formula.
    Thomas,
    /// Andoyer's approximation.
    Andoyer,
    /// Karney's algorithm.
    Karney,
}

impl EdgeAlgorithm {
    fn parse(s: &str) -> Result<Self> {
        match s {
            "spherical" => Ok(EdgeAlgorithm::Spherical),
            "vincenty" => Ok(EdgeAlgorithm::Vincenty),
            "thomas" => Ok(EdgeAlgorithm::Thomas),
            "andoyer" => Ok(EdgeAlgorithm::Andoyer),
            "karney" => Ok(EdgeAlgorithm::Karney),
            other => Err(Error::InvalidFormat(format!("edge algorithm {}", other))),
        }
    }
}

impl fmt::Display for EdgeAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            EdgeAlgorithm::Spherical => write!(f, "spherical"),
            EdgeAlgorithm::Vincenty => write!(f, "vincenty"),
            EdgeAlgorithm::Thomas => write!(f, "thomas"),
            EdgeAlgorithm::Andoyer => write!(f, "andoyer"),
            EdgeAlgorithm::Karney => write!(f, "karney"),
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[serde(remote = "Self")]
/// Primitive Types within a schema.
pub enum PrimitiveType {
    /// True or False
    Boolean,
    /// 32-bit signed integer
    Int,
    /// 64-bit signed integer
    Long,
    /// 32-bit IEEE 754 floating point.
    Float,
    /// 64-bit IEEE 754 floating point.
    Double,
    /// Fixed point decimal
    Decimal {
        /// The number of digits in the number.
        precision: u32,
        /// The number of digits to the right of the decimal point.
        scale: u8,
    },
    /// Calendar date without timezone or time.
    Date,
    /// Time of day without date or timezone, microsecond precision.
    Time,
    /// Timestamp without timezone, microsecond precision.
    Timestamp,
    /// Timestamp with timezone, microsecond precision.
    Timestamptz,
    /// Timestamp without timezone, nanosecond precision.
    #[serde(rename = "timestamp_ns")]
    TimestampNs,
    /// Timestamp with timezone, nanosecond precision.
    #[serde(rename = "timestamptz_ns")]
    TimestamptzNs,
    /// Arbitrary-length character sequences
    String,
    /// Universally Unique Identifiers
    Uuid,
    /// Fixed length byte array
    Fixed(u64),
    /// Arbitrary-length byte array.
    Binary,
    /// Semi-structured value with its own embedded schema.
    Variant,
    /// A type that matches no values. Fields of this type must be optional.
    Unknown,
    /// Planar geometry with a coordinate reference system.
    Geometry(String),
    /// Geography on an ellipsoid with an edge interpolation algorithm.
    Geography {
        /// Coordinate reference system identifier.
        crs: String,
        /// Edge interpolation algorithm.
        algorithm: EdgeAlgorithm,
    },
}

impl PrimitiveType {
    /// Geometry with the default CRS.
    pub fn geometry() -> Self {
        PrimitiveType::Geometry(DEFAULT_CRS.to_string())
    }
    /// Geography with the default CRS and algorithm.
    pub fn geography() -> Self {
        PrimitiveType::Geography {
            crs: DEFAULT_CRS.to_string(),
            algorithm: EdgeAlgorithm::default(),
        }
    }
    /// Float or double.
    pub fn is_floating_point(&self) -> bool {
        matches!(self, PrimitiveType::Float | PrimitiveType::Double)
    }
    /// Geometry or geography.
    pub fn is_geospatial(&self) -> bool {
        matches!(
            self,
            PrimitiveType::Geometry(_) | PrimitiveType::Geography { .. }
        )
    }
    /// Types whose fields must carry an explicit null default.
    pub fn requires_null_default(&self) -> bool {
        matches!(self, PrimitiveType::Unknown | PrimitiveType::Variant) || self.is_geospatial()
    }
    /// Fields of this type may never be required.
    pub fn must_be_optional(&self) -> bool {
        matches!(self, PrimitiveType::Unknown)
    }

    /// Whether a column of type `self` may be widened to `new` without
    /// rewriting data. Allowed promotions: `int -> long`, `float -> double`,
    /// `fixed -> binary` and widening the precision of a decimal with
    /// unchanged scale.
    pub fn can_promote_to(&self, new: &PrimitiveType) -> bool {
        if self == new {
            return true;
        }
        match (self, new) {
            (PrimitiveType::Int, PrimitiveType::Long) => true,
            (PrimitiveType::Float, PrimitiveType::Double) => true,
            (PrimitiveType::Fixed(_), PrimitiveType::Binary) => true,
            (
                PrimitiveType::Decimal {
                    precision: p1,
                    scale: s1,
                },
                PrimitiveType::Decimal {
                    precision: p2,
                    scale: s2,
                },
            ) => s1 == s2 && p2 >= p1,
            _ => false,
        }
    }
}

/// Serialize for PrimitiveType with special handling for the
/// parameterized types.
impl Serialize for PrimitiveType {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use PrimitiveType::*;
        match self {
            Decimal {
                precision: p,
                scale: s,
            } => serializer.serialize_str(&format!("decimal({p},{s})")),
            Fixed(l) => serializer.serialize_str(&format!("fixed[{l}]")),
            Geometry(crs) if crs == DEFAULT_CRS => serializer.serialize_str("geometry"),
            Geometry(crs) => serializer.serialize_str(&format!("geometry({crs})")),
            Geography { crs, algorithm } => {
                if crs == DEFAULT_CRS && *algorithm == EdgeAlgorithm::default() {
                    serializer.serialize_str("geography")
                } else if *algorithm == EdgeAlgorithm::default() {
                    serializer.serialize_str(&format!("geography({crs})"))
                } else {
                    serializer.serialize_str(&format!("geography({crs},{algorithm})"))
                }
            }
            _ => PrimitiveType::serialize(self, serializer),
        }
    }
}

/// Deserialize for PrimitiveType with special handling for the
/// parameterized types.
impl<'de> Deserialize<'de> for PrimitiveType {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        if s.starts_with("decimal") {
            parse_decimal(&s).map_err(de::Error::custom)
        } else if s.starts_with("fixed") {
            parse_fixed(&s).map_err(de::Error::custom)
        } else if s.starts_with("geometry") {
            parse_geometry(&s).map_err(de::Error::custom)
        } else if s.starts_with("geography") {
            parse_geography(&s).map_err(de::Error::custom)
        } else {
            PrimitiveType::deserialize(s.into_deserializer())
        }
    }
}

impl fmt::Display for PrimitiveType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PrimitiveType::Boolean => write!(f, "boolean"),
            PrimitiveType::Int => write!(f, "int"),
            PrimitiveType::Long => write!(f, "long"),
            PrimitiveType::Float => write!(f, "float"),
            PrimitiveType::Double => write!(f, "double"),
            PrimitiveType::Decimal { precision, scale } => {
                write!(f, "decimal({},{})", precision, scale)
            }
            PrimitiveType::Date => write!(f, "date"),
            PrimitiveType::Time => write!(f, "time"),
            PrimitiveType::Timestamp => write!(f, "timestamp"),
            PrimitiveType::Timestamptz => write!(f, "timestamptz"),
            PrimitiveType::TimestampNs => write!(f, "timestamp_ns"),
            PrimitiveType::TimestamptzNs => write!(f, "timestamptz_ns"),
            PrimitiveType::String => write!(f, "string"),
            PrimitiveType::Uuid => write!(f, "uuid"),
            PrimitiveType::Fixed(l) => write!(f, "fixed[{}]", l),
            PrimitiveType::Binary => write!(f, "binary"),
            PrimitiveType::Variant => write!(f, "variant"),
            PrimitiveType::Unknown => write!(f, "unknown"),
            PrimitiveType::Geometry(crs) => write!(f, "geometry({})", crs),
            PrimitiveType::Geography { crs, algorithm } => {
                write!(f, "geography({},{})", crs, algorithm)
            }
        }
    }
}

/// Split a `name(arg, ...)`-style parameterized type string into its
/// arguments, trimmed. Returns `None` unless the string is exactly `name`
/// followed by a non-empty delimited argument list.
fn type_arguments<'a>(s: &'a str, name: &str, open: char, close: char) -> Option<Vec<&'a str>> {
    let inner = s
        .strip_prefix(name)?
        .strip_prefix(open)?
        .strip_suffix(close)?;
    if inner.is_empty() {
        return None;
    }
    Some(inner.split(',').map(str::trim).collect())
}

/// Parse `decimal(P,S)`.
pub fn parse_decimal(s: &str) -> Result<PrimitiveType> {
    let invalid = || Error::InvalidFormat(format!("decimal type {}", s));
    match type_arguments(s, "decimal", '(', ')').ok_or_else(invalid)?.as_slice() {
        [precision, scale] => Ok(PrimitiveType::Decimal {
            precision: precision.parse().map_err(|_| invalid())?,
            scale: scale.parse().map_err(|_| invalid())?,
        }),
        _ => Err(invalid()),
    }
}

/// Parse `fixed[L]`.
pub fn parse_fixed(s: &str) -> Result<PrimitiveType> {
    let invalid = || Error::InvalidFormat(format!("fixed type {}", s));
    match type_arguments(s, "fixed", '[', ']').ok_or_else(invalid)?.as_slice() {
        [length] => Ok(PrimitiveType::Fixed(length.parse().map_err(|_| invalid())?)),
        _ => Err(invalid()),
    }
}

/// Parse `geometry` or `geometry(CRS)`. A bare `geometry` takes the
/// default CRS.
pub fn parse_geometry(s: &str) -> Result<PrimitiveType> {
    if s == "geometry" {
        return Ok(PrimitiveType::geometry());
    }
    match type_arguments(s, "geometry", '(', ')').as_deref() {
        Some([crs]) => Ok(PrimitiveType::Geometry((*crs).to_string())),
        _ => Err(Error::InvalidFormat(format!("geometry type {}", s))),
    }
}

/// Parse `geography`, `geography(CRS)` or `geography(CRS, ALG)`. Omitted
/// parameters take the default CRS and the spherical algorithm.
pub fn parse_geography(s: &str) -> Result<PrimitiveType> {
    if s == "geography" {
        return Ok(PrimitiveType::geography());
    }
    let invalid = || Error::InvalidFormat(format!("geography type {}", s));
    match type_arguments(s, "geography", '(', ')').ok_or_else(invalid)?.as_slice() {
        [crs] => Ok(PrimitiveType::Geography {
            crs: (*crs).to_string(),
            algorithm: EdgeAlgorithm::default(),
        }),
        [crs, algorithm] => Ok(PrimitiveType::Geography {
            crs: (*crs).to_string(),
            algorithm: EdgeAlgorithm::parse(algorithm)?,
        }),
        _ => Err(invalid()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(primitive: PrimitiveType) -> PrimitiveType {
        let json = serde_json::to_string(&primitive).unwrap();
        serde_json::from_str(&json).unwrap()
    }

    #[test]
    fn test_all_valid_types() {
        let type_mappings = vec![
            PrimitiveType::Boolean,
            PrimitiveType::Int,
            PrimitiveType::Long,
            PrimitiveType::Float,
            PrimitiveType::Double,
            PrimitiveType::Decimal {
                precision: 9,
                scale: 2,
            },
            PrimitiveType::Date,
            PrimitiveType::Time,
            PrimitiveType::Timestamp,
            PrimitiveType::Timestamptz,
            PrimitiveType::TimestampNs,
            PrimitiveType::TimestamptzNs,
            PrimitiveType::String,
            PrimitiveType::Uuid,
            PrimitiveType::Fixed(16),
            PrimitiveType::Binary,
            PrimitiveType::Variant,
            PrimitiveType::Unknown,
            PrimitiveType::geometry(),
            PrimitiveType::geography(),
        ];

        for primitive in type_mappings {
            assert_eq!(primitive, roundtrip(primitive.clone()));
        }
    }

    #[test]
    fn test_timestamp_ns_serialized_form() {
        let json = serde_json::to_string(&PrimitiveType::TimestampNs).unwrap();
        assert_eq!(json, r#""timestamp_ns""#);
    }

    #[test]
    fn test_geometry_default_crs_omitted() {
        let json = serde_json::to_string(&PrimitiveType::geometry()).unwrap();
        assert_eq!(json, r#""geometry""#);
        let json =
            serde_json::to_string(&PrimitiveType::Geometry("EPSG:4326".to_string())).unwrap();
        assert_eq!(json, r#""geometry(EPSG:4326)""#);
    }

    #[test]
    fn test_geography_with_algorithm() {
        let geography = PrimitiveType::Geography {
            crs: "EPSG:4326".to_string(),
            algorithm: EdgeAlgorithm::Karney,
        };
        let json = serde_json::to_string(&geography).unwrap();
        assert_eq!(json, r#""geography(EPSG:4326,karney)""#);
        assert_eq!(geography, roundtrip(geography.clone()));

        let parsed: PrimitiveType = serde_json::from_str(r#""geography""#).unwrap();
        assert_eq!(parsed, PrimitiveType::geography());
    }

    #[test]
    fn test_parameterized_type_parsing() {
        // whitespace after the comma is tolerated
        let parsed: PrimitiveType = serde_json::from_str(r#""decimal(9, 2)""#).unwrap();
        assert_eq!(
            parsed,
            PrimitiveType::Decimal {
                precision: 9,
                scale: 2
            }
        );
        assert_eq!(parse_fixed("fixed[16]").unwrap(), PrimitiveType::Fixed(16));
        assert_eq!(
            parse_geography("geography(EPSG:4326)").unwrap(),
            PrimitiveType::Geography {
                crs: "EPSG:4326".to_string(),
                algorithm: EdgeAlgorithm::Spherical,
            }
        );
    }

    #[test]
    fn test_invalid_parameterized_types() {
        assert!(serde_json::from_str::<PrimitiveType>(r#""decimal(1,1000)""#).is_err());
        assert!(serde_json::from_str::<PrimitiveType>(r#""decimal(9)""#).is_err());
        assert!(serde_json::from_str::<PrimitiveType>(r#""fixed[0.1]""#).is_err());
        assert!(serde_json::from_str::<PrimitiveType>(r#""fixed[]""#).is_err());
        assert!(serde_json::from_str::<PrimitiveType>(r#""geometry()""#).is_err());
        assert!(serde_json::from_str::<PrimitiveType>(r#""geography(crs,flat)""#).is_err());
    }

    #[test]
    fn test_promotion_table() {
        assert!(PrimitiveType::Int.can_promote_to(&PrimitiveType::Long));
        assert!(PrimitiveType::Float.can_promote_to(&PrimitiveType::Double));
        assert!(PrimitiveType::Fixed(8).can_promote_to(&PrimitiveType::Binary));
        assert!(PrimitiveType::Decimal {
            precision: 9,
            scale: 2
        }
        .can_promote_to(&PrimitiveType::Decimal {
            precision: 18,
            scale: 2
        }));
        // narrowing, scale changes and transitive promotions are rejected
        assert!(!PrimitiveType::Long.can_promote_to(&PrimitiveType::Int));
        assert!(!PrimitiveType::Decimal {
            precision: 18,
            scale: 2
        }
        .can_promote_to(&PrimitiveType::Decimal {
            precision: 9,
            scale: 2
        }));
        assert!(!PrimitiveType::Decimal {
            precision: 9,
            scale: 2
        }
        .can_promote_to(&PrimitiveType::Decimal {
            precision: 18,
            scale: 4
        }));
        assert!(!PrimitiveType::Int.can_promote_to(&PrimitiveType::Double));
    }

    #[test]
    fn test_predicates() {
        assert!(PrimitiveType::Float.is_floating_point());
        assert!(!PrimitiveType::Int.is_floating_point());
        assert!(PrimitiveType::geometry().is_geospatial());
        assert!(PrimitiveType::Unknown.must_be_optional());
        assert!(PrimitiveType::Variant.requires_null_default());
    }
}
