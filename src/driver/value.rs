//! Driver-level values.
//!
//! [`Value`] is what application code sees in records and passes as query
//! parameters. It widens the wire-level [`PackValue`] with the graph
//! types (nodes, relationships, paths), spatial points and temporal
//! values. All "get as" coercions live here, in a thin layer over the
//! sum type; the wire codec below never interprets structure tags.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

use super::error::{DriverError, DriverResult};
use crate::bolt::packstream::{PackValue, Structure};

/// Structure tags for graph, temporal and spatial types.
mod tag {
    pub const NODE: u8 = 0x4E; // 'N'
    pub const RELATIONSHIP: u8 = 0x52; // 'R'
    pub const UNBOUND_RELATIONSHIP: u8 = 0x72; // 'r'
    pub const PATH: u8 = 0x50; // 'P'
    pub const DATE: u8 = 0x44; // 'D'
    pub const TIME: u8 = 0x54; // 'T'
    pub const LOCAL_TIME: u8 = 0x74; // 't'
    pub const DATE_TIME: u8 = 0x46; // 'F'
    pub const LOCAL_DATE_TIME: u8 = 0x64; // 'd'
    pub const DURATION: u8 = 0x45; // 'E'
    pub const POINT_2D: u8 = 0x58; // 'X'
    pub const POINT_3D: u8 = 0x59; // 'Y'
}

const NANOS_PER_SEC: i64 = 1_000_000_000;

/// A value in a query result or parameter map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Absence of a value.
    Null,
    /// Boolean.
    Boolean(bool),
    /// 64-bit signed integer.
    Integer(i64),
    /// 64-bit float.
    Float(f64),
    /// UTF-8 string.
    String(String),
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// Ordered list.
    List(Vec<Value>),
    /// String-keyed map.
    Map(HashMap<String, Value>),
    /// Graph node.
    Node(Node),
    /// Graph relationship.
    Relationship(Relationship),
    /// Path through the graph.
    Path(Path),
    /// Spatial point.
    Point(Point),
    /// Calendar date.
    Date(NaiveDate),
    /// Time of day with a UTC offset.
    Time(OffsetTime),
    /// Time of day without a zone.
    LocalTime(NaiveTime),
    /// Instant with a fixed UTC offset.
    DateTime(DateTime<FixedOffset>),
    /// Wall-clock date and time without a zone.
    LocalDateTime(NaiveDateTime),
    /// Calendar-aware duration.
    Duration(Duration),
}

/// Graph node: identity, labels, properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Server-assigned node id.
    pub id: i64,
    /// Labels, in server order.
    pub labels: Vec<String>,
    /// Property map.
    pub properties: HashMap<String, Value>,
}

/// Graph relationship bound to its endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    /// Server-assigned relationship id.
    pub id: i64,
    /// Start node id.
    pub start_node_id: i64,
    /// End node id.
    pub end_node_id: i64,
    /// Relationship type.
    pub rel_type: String,
    /// Property map.
    pub properties: HashMap<String, Value>,
}

/// Relationship as it appears inside a path, without endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnboundRelationship {
    /// Server-assigned relationship id.
    pub id: i64,
    /// Relationship type.
    pub rel_type: String,
    /// Property map.
    pub properties: HashMap<String, Value>,
}

/// Alternating sequence of nodes and relationships.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Path {
    /// Distinct nodes touched by the path.
    pub nodes: Vec<Node>,
    /// Distinct relationships touched by the path.
    pub relationships: Vec<UnboundRelationship>,
    /// Walk over the two lists, as sent by the server.
    pub indices: Vec<i64>,
}

/// Spatial point with an SRID and two or three coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Spatial reference system id.
    pub srid: i64,
    /// X coordinate (or longitude).
    pub x: f64,
    /// Y coordinate (or latitude).
    pub y: f64,
    /// Z coordinate for 3D points.
    pub z: Option<f64>,
}

/// Time of day with an explicit UTC offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OffsetTime {
    /// Time of day.
    pub time: NaiveTime,
    /// Offset from UTC in seconds.
    pub offset_seconds: i32,
}

/// Duration in the calendar-aware form the server uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Duration {
    /// Whole months.
    pub months: i64,
    /// Whole days.
    pub days: i64,
    /// Whole seconds.
    pub seconds: i64,
    /// Sub-second remainder in nanoseconds.
    pub nanoseconds: i64,
}

impl Duration {
    /// New duration from its four components.
    pub fn new(months: i64, days: i64, seconds: i64, nanoseconds: i64) -> Self {
        Self {
            months,
            days,
            seconds,
            nanoseconds,
        }
    }
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "P{}M{}DT{}.{:09}S",
            self.months, self.days, self.seconds, self.nanoseconds
        )
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.z {
            Some(z) => write!(f, "point(srid={}, x={}, y={}, z={})", self.srid, self.x, self.y, z),
            None => write!(f, "point(srid={}, x={}, y={})", self.srid, self.x, self.y),
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(#{}:{})", self.id, self.labels.join(":"))
    }
}

impl fmt::Display for Relationship {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "(#{})-[#{}:{}]->(#{})",
            self.start_node_id, self.id, self.rel_type, self.end_node_id
        )
    }
}

impl Value {
    /// True for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Read as a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Read as an integer.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Read as a float; integers widen.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Borrow as a string slice.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Borrow as a list slice.
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    /// Borrow as a map.
    pub fn as_map(&self) -> Option<&HashMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Borrow as a node.
    pub fn as_node(&self) -> Option<&Node> {
        match self {
            Value::Node(n) => Some(n),
            _ => None,
        }
    }

    /// Borrow as a relationship.
    pub fn as_relationship(&self) -> Option<&Relationship> {
        match self {
            Value::Relationship(r) => Some(r),
            _ => None,
        }
    }

    /// Name of the value type, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "Null",
            Value::Boolean(_) => "Boolean",
            Value::Integer(_) => "Integer",
            Value::Float(_) => "Float",
            Value::String(_) => "String",
            Value::Bytes(_) => "Bytes",
            Value::List(_) => "List",
            Value::Map(_) => "Map",
            Value::Node(_) => "Node",
            Value::Relationship(_) => "Relationship",
            Value::Path(_) => "Path",
            Value::Point(_) => "Point",
            Value::Date(_) => "Date",
            Value::Time(_) => "Time",
            Value::LocalTime(_) => "LocalTime",
            Value::DateTime(_) => "DateTime",
            Value::LocalDateTime(_) => "LocalDateTime",
            Value::Duration(_) => "Duration",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::String(s) => write!(f, "\"{}\"", s),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Value::List(l) => write!(f, "[{} items]", l.len()),
            Value::Map(m) => write!(f, "{{{} entries}}", m.len()),
            Value::Node(n) => write!(f, "{}", n),
            Value::Relationship(r) => write!(f, "{}", r),
            Value::Path(p) => write!(f, "<path of {} nodes>", p.nodes.len()),
            Value::Point(p) => write!(f, "{}", p),
            Value::Date(d) => write!(f, "{}", d),
            Value::Time(t) => write!(f, "{}{:+}", t.time, t.offset_seconds),
            Value::LocalTime(t) => write!(f, "{}", t),
            Value::DateTime(dt) => write!(f, "{}", dt),
            Value::LocalDateTime(dt) => write!(f, "{}", dt),
            Value::Duration(d) => write!(f, "{}", d),
        }
    }
}

// Parameter ergonomics.

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::List(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(inner) => inner.into(),
            None => Value::Null,
        }
    }
}

// Typed extraction.

impl TryFrom<Value> for bool {
    type Error = DriverError;
    fn try_from(v: Value) -> DriverResult<Self> {
        v.as_bool()
            .ok_or_else(|| DriverError::type_conversion(format!("expected Boolean, got {}", v.type_name())))
    }
}

impl TryFrom<Value> for i64 {
    type Error = DriverError;
    fn try_from(v: Value) -> DriverResult<Self> {
        v.as_int()
            .ok_or_else(|| DriverError::type_conversion(format!("expected Integer, got {}", v.type_name())))
    }
}

impl TryFrom<Value> for f64 {
    type Error = DriverError;
    fn try_from(v: Value) -> DriverResult<Self> {
        v.as_float()
            .ok_or_else(|| DriverError::type_conversion(format!("expected Float, got {}", v.type_name())))
    }
}

impl TryFrom<Value> for String {
    type Error = DriverError;
    fn try_from(v: Value) -> DriverResult<Self> {
        match v {
            Value::String(s) => Ok(s),
            other => Err(DriverError::type_conversion(format!(
                "expected String, got {}",
                other.type_name()
            ))),
        }
    }
}

impl TryFrom<Value> for Node {
    type Error = DriverError;
    fn try_from(v: Value) -> DriverResult<Self> {
        match v {
            Value::Node(n) => Ok(n),
            other => Err(DriverError::type_conversion(format!(
                "expected Node, got {}",
                other.type_name()
            ))),
        }
    }
}

impl TryFrom<Value> for Relationship {
    type Error = DriverError;
    fn try_from(v: Value) -> DriverResult<Self> {
        match v {
            Value::Relationship(r) => Ok(r),
            other => Err(DriverError::type_conversion(format!(
                "expected Relationship, got {}",
                other.type_name()
            ))),
        }
    }
}

impl TryFrom<Value> for Path {
    type Error = DriverError;
    fn try_from(v: Value) -> DriverResult<Self> {
        match v {
            Value::Path(p) => Ok(p),
            other => Err(DriverError::type_conversion(format!(
                "expected Path, got {}",
                other.type_name()
            ))),
        }
    }
}

// Wire mapping.

impl From<Value> for PackValue {
    fn from(v: Value) -> Self {
        match v {
            Value::Null => PackValue::Null,
            Value::Boolean(b) => PackValue::Boolean(b),
            Value::Integer(i) => PackValue::Integer(i),
            Value::Float(f) => PackValue::Float(f),
            Value::String(s) => PackValue::String(s),
            Value::Bytes(b) => PackValue::Bytes(b),
            Value::List(l) => PackValue::List(l.into_iter().map(Into::into).collect()),
            Value::Map(m) => {
                PackValue::Map(m.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
            Value::Node(n) => node_to_wire(n),
            Value::Relationship(r) => relationship_to_wire(r),
            Value::Path(p) => path_to_wire(p),
            Value::Point(p) => point_to_wire(p),
            Value::Date(d) => {
                let epoch = epoch_date();
                let days = d.signed_duration_since(epoch).num_days();
                PackValue::Structure(Structure::new(tag::DATE, vec![PackValue::Integer(days)]))
            }
            Value::Time(t) => {
                let nanos = t.time.num_seconds_from_midnight() as i64 * NANOS_PER_SEC
                    + t.time.nanosecond() as i64;
                PackValue::Structure(Structure::new(
                    tag::TIME,
                    vec![
                        PackValue::Integer(nanos),
                        PackValue::Integer(t.offset_seconds as i64),
                    ],
                ))
            }
            Value::LocalTime(t) => {
                let nanos =
                    t.num_seconds_from_midnight() as i64 * NANOS_PER_SEC + t.nanosecond() as i64;
                PackValue::Structure(Structure::new(
                    tag::LOCAL_TIME,
                    vec![PackValue::Integer(nanos)],
                ))
            }
            Value::DateTime(dt) => PackValue::Structure(Structure::new(
                tag::DATE_TIME,
                vec![
                    PackValue::Integer(dt.timestamp()),
                    PackValue::Integer(dt.timestamp_subsec_nanos() as i64),
                    PackValue::Integer(dt.offset().local_minus_utc() as i64),
                ],
            )),
            Value::LocalDateTime(dt) => PackValue::Structure(Structure::new(
                tag::LOCAL_DATE_TIME,
                vec![
                    PackValue::Integer(dt.and_utc().timestamp()),
                    PackValue::Integer(dt.and_utc().timestamp_subsec_nanos() as i64),
                ],
            )),
            Value::Duration(d) => PackValue::Structure(Structure::new(
                tag::DURATION,
                vec![
                    PackValue::Integer(d.months),
                    PackValue::Integer(d.days),
                    PackValue::Integer(d.seconds),
                    PackValue::Integer(d.nanoseconds),
                ],
            )),
        }
    }
}

impl TryFrom<PackValue> for Value {
    type Error = DriverError;

    fn try_from(v: PackValue) -> DriverResult<Self> {
        Ok(match v {
            PackValue::Null => Value::Null,
            PackValue::Boolean(b) => Value::Boolean(b),
            PackValue::Integer(i) => Value::Integer(i),
            PackValue::Float(f) => Value::Float(f),
            PackValue::String(s) => Value::String(s),
            PackValue::Bytes(b) => Value::Bytes(b),
            PackValue::List(l) => Value::List(
                l.into_iter()
                    .map(Value::try_from)
                    .collect::<DriverResult<_>>()?,
            ),
            PackValue::Map(m) => Value::Map(
                m.into_iter()
                    .map(|(k, v)| Value::try_from(v).map(|v| (k, v)))
                    .collect::<DriverResult<_>>()?,
            ),
            PackValue::Structure(s) => structure_to_value(s)?,
        })
    }
}

fn epoch_date() -> NaiveDate {
    // 1970-01-01 is always representable.
    NaiveDate::from_ymd_opt(1970, 1, 1).expect("unix epoch date")
}

fn node_to_wire(n: Node) -> PackValue {
    PackValue::Structure(Structure::new(
        tag::NODE,
        vec![
            PackValue::Integer(n.id),
            PackValue::List(n.labels.into_iter().map(PackValue::String).collect()),
            properties_to_wire(n.properties),
        ],
    ))
}

fn relationship_to_wire(r: Relationship) -> PackValue {
    PackValue::Structure(Structure::new(
        tag::RELATIONSHIP,
        vec![
            PackValue::Integer(r.id),
            PackValue::Integer(r.start_node_id),
            PackValue::Integer(r.end_node_id),
            PackValue::String(r.rel_type),
            properties_to_wire(r.properties),
        ],
    ))
}

fn path_to_wire(p: Path) -> PackValue {
    PackValue::Structure(Structure::new(
        tag::PATH,
        vec![
            PackValue::List(p.nodes.into_iter().map(node_to_wire).collect()),
            PackValue::List(
                p.relationships
                    .into_iter()
                    .map(|r| {
                        PackValue::Structure(Structure::new(
                            tag::UNBOUND_RELATIONSHIP,
                            vec![
                                PackValue::Integer(r.id),
                                PackValue::String(r.rel_type),
                                properties_to_wire(r.properties),
                            ],
                        ))
                    })
                    .collect(),
            ),
            PackValue::List(p.indices.into_iter().map(PackValue::Integer).collect()),
        ],
    ))
}

fn point_to_wire(p: Point) -> PackValue {
    match p.z {
        Some(z) => PackValue::Structure(Structure::new(
            tag::POINT_3D,
            vec![
                PackValue::Integer(p.srid),
                PackValue::Float(p.x),
                PackValue::Float(p.y),
                PackValue::Float(z),
            ],
        )),
        None => PackValue::Structure(Structure::new(
            tag::POINT_2D,
            vec![
                PackValue::Integer(p.srid),
                PackValue::Float(p.x),
                PackValue::Float(p.y),
            ],
        )),
    }
}

fn properties_to_wire(props: HashMap<String, Value>) -> PackValue {
    PackValue::Map(props.into_iter().map(|(k, v)| (k, v.into())).collect())
}

fn structure_to_value(s: Structure) -> DriverResult<Value> {
    let bad = |what: &str| DriverError::type_conversion(format!("malformed {} structure", what));
    match s.tag {
        tag::NODE => Ok(Value::Node(node_from_structure(&s)?)),
        tag::RELATIONSHIP => {
            let id = s.field(0).and_then(|v| v.as_int()).ok_or_else(|| bad("Relationship"))?;
            let start = s.field(1).and_then(|v| v.as_int()).ok_or_else(|| bad("Relationship"))?;
            let end = s.field(2).and_then(|v| v.as_int()).ok_or_else(|| bad("Relationship"))?;
            let rel_type = s
                .field(3)
                .and_then(|v| v.as_str())
                .ok_or_else(|| bad("Relationship"))?
                .to_string();
            let properties = properties_from_wire(s.field(4))?;
            Ok(Value::Relationship(Relationship {
                id,
                start_node_id: start,
                end_node_id: end,
                rel_type,
                properties,
            }))
        }
        tag::PATH => {
            let nodes = s
                .field(0)
                .and_then(|v| v.as_list())
                .ok_or_else(|| bad("Path"))?
                .iter()
                .map(|v| {
                    v.as_structure()
                        .ok_or_else(|| bad("Path"))
                        .and_then(node_from_structure)
                })
                .collect::<DriverResult<Vec<_>>>()?;
            let relationships = s
                .field(1)
                .and_then(|v| v.as_list())
                .ok_or_else(|| bad("Path"))?
                .iter()
                .map(|v| {
                    let s = v.as_structure().ok_or_else(|| bad("Path"))?;
                    let id = s.field(0).and_then(|v| v.as_int()).ok_or_else(|| bad("Path"))?;
                    let rel_type = s
                        .field(1)
                        .and_then(|v| v.as_str())
                        .ok_or_else(|| bad("Path"))?
                        .to_string();
                    let properties = properties_from_wire(s.field(2))?;
                    Ok(UnboundRelationship {
                        id,
                        rel_type,
                        properties,
                    })
                })
                .collect::<DriverResult<Vec<_>>>()?;
            let indices = s
                .field(2)
                .and_then(|v| v.as_list())
                .map(|l| l.iter().filter_map(|v| v.as_int()).collect())
                .unwrap_or_default();
            Ok(Value::Path(Path {
                nodes,
                relationships,
                indices,
            }))
        }
        tag::POINT_2D => {
            let srid = s.field(0).and_then(|v| v.as_int()).ok_or_else(|| bad("Point"))?;
            let x = s.field(1).and_then(|v| v.as_float()).ok_or_else(|| bad("Point"))?;
            let y = s.field(2).and_then(|v| v.as_float()).ok_or_else(|| bad("Point"))?;
            Ok(Value::Point(Point { srid, x, y, z: None }))
        }
        tag::POINT_3D => {
            let srid = s.field(0).and_then(|v| v.as_int()).ok_or_else(|| bad("Point"))?;
            let x = s.field(1).and_then(|v| v.as_float()).ok_or_else(|| bad("Point"))?;
            let y = s.field(2).and_then(|v| v.as_float()).ok_or_else(|| bad("Point"))?;
            let z = s.field(3).and_then(|v| v.as_float()).ok_or_else(|| bad("Point"))?;
            Ok(Value::Point(Point {
                srid,
                x,
                y,
                z: Some(z),
            }))
        }
        tag::DATE => {
            let days = s.field(0).and_then(|v| v.as_int()).ok_or_else(|| bad("Date"))?;
            chrono::Duration::try_days(days)
                .and_then(|delta| epoch_date().checked_add_signed(delta))
                .map(Value::Date)
                .ok_or_else(|| bad("Date"))
        }
        tag::TIME => {
            let nanos = s.field(0).and_then(|v| v.as_int()).ok_or_else(|| bad("Time"))?;
            let offset = s.field(1).and_then(|v| v.as_int()).ok_or_else(|| bad("Time"))?;
            let time = time_from_midnight_nanos(nanos).ok_or_else(|| bad("Time"))?;
            Ok(Value::Time(OffsetTime {
                time,
                offset_seconds: offset as i32,
            }))
        }
        tag::LOCAL_TIME => {
            let nanos = s.field(0).and_then(|v| v.as_int()).ok_or_else(|| bad("LocalTime"))?;
            time_from_midnight_nanos(nanos)
                .map(Value::LocalTime)
                .ok_or_else(|| bad("LocalTime"))
        }
        tag::DATE_TIME => {
            let secs = s.field(0).and_then(|v| v.as_int()).ok_or_else(|| bad("DateTime"))?;
            let nanos = s.field(1).and_then(|v| v.as_int()).ok_or_else(|| bad("DateTime"))?;
            let offset = s.field(2).and_then(|v| v.as_int()).ok_or_else(|| bad("DateTime"))?;
            let tz = FixedOffset::east_opt(offset as i32).ok_or_else(|| bad("DateTime"))?;
            DateTime::from_timestamp(secs, nanos as u32)
                .map(|utc| Value::DateTime(utc.with_timezone(&tz)))
                .ok_or_else(|| bad("DateTime"))
        }
        tag::LOCAL_DATE_TIME => {
            let secs = s.field(0).and_then(|v| v.as_int()).ok_or_else(|| bad("LocalDateTime"))?;
            let nanos = s.field(1).and_then(|v| v.as_int()).ok_or_else(|| bad("LocalDateTime"))?;
            DateTime::from_timestamp(secs, nanos as u32)
                .map(|utc| Value::LocalDateTime(utc.naive_utc()))
                .ok_or_else(|| bad("LocalDateTime"))
        }
        tag::DURATION => {
            let months = s.field(0).and_then(|v| v.as_int()).ok_or_else(|| bad("Duration"))?;
            let days = s.field(1).and_then(|v| v.as_int()).ok_or_else(|| bad("Duration"))?;
            let seconds = s.field(2).and_then(|v| v.as_int()).ok_or_else(|| bad("Duration"))?;
            let nanoseconds = s.field(3).and_then(|v| v.as_int()).ok_or_else(|| bad("Duration"))?;
            Ok(Value::Duration(Duration::new(
                months,
                days,
                seconds,
                nanoseconds,
            )))
        }
        other => Err(DriverError::type_conversion(format!(
            "unknown structure tag 0x{:02X} in result",
            other
        ))),
    }
}

fn node_from_structure(s: &Structure) -> DriverResult<Node> {
    let bad = || DriverError::type_conversion("malformed Node structure".to_string());
    let id = s.field(0).and_then(|v| v.as_int()).ok_or_else(bad)?;
    let labels = s
        .field(1)
        .and_then(|v| v.as_list())
        .ok_or_else(bad)?
        .iter()
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect();
    let properties = properties_from_wire(s.field(2))?;
    Ok(Node {
        id,
        labels,
        properties,
    })
}

fn properties_from_wire(v: Option<&PackValue>) -> DriverResult<HashMap<String, Value>> {
    match v {
        Some(PackValue::Map(m)) => m
            .iter()
            .map(|(k, v)| Value::try_from(v.clone()).map(|v| (k.clone(), v)))
            .collect(),
        Some(other) => Err(DriverError::type_conversion(format!(
            "expected property map, got {}",
            other.type_name()
        ))),
        None => Ok(HashMap::new()),
    }
}

fn time_from_midnight_nanos(nanos: i64) -> Option<NaiveTime> {
    if nanos < 0 {
        return None;
    }
    let secs = (nanos / NANOS_PER_SEC) as u32;
    let rem = (nanos % NANOS_PER_SEC) as u32;
    NaiveTime::from_num_seconds_from_midnight_opt(secs, rem)
}
