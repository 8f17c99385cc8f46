//! The EVENT response, pushed by the server on stream -1.

use crate::frame::frame_errors::ParseError;
use crate::frame::server_event_type::EventType;
use crate::frame::types;
use bytes::BufMut;
use std::net::SocketAddr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    TopologyChange(TopologyChangeEvent),
    StatusChange(StatusChangeEvent),
    SchemaChange(SchemaChangeEvent),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopologyChangeEvent {
    NewNode(SocketAddr),
    RemovedNode(SocketAddr),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusChangeEvent {
    Up(SocketAddr),
    Down(SocketAddr),
}

/// Describes a schema change. Shared by the SCHEMA_CHANGE event and the
/// SchemaChange result kind, which have the same body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaChangeEvent {
    KeyspaceChange {
        change_type: SchemaChangeType,
        keyspace_name: String,
    },
    TableChange {
        change_type: SchemaChangeType,
        keyspace_name: String,
        object_name: String,
    },
    /// A type, function or aggregate changed.
    OtherChange {
        change_type: SchemaChangeType,
        target: String,
        keyspace_name: String,
        object_name: String,
        arguments: Vec<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaChangeType {
    Created,
    Updated,
    Dropped,
}

impl SchemaChangeType {
    fn as_str(&self) -> &'static str {
        match self {
            SchemaChangeType::Created => "CREATED",
            SchemaChangeType::Updated => "UPDATED",
            SchemaChangeType::Dropped => "DROPPED",
        }
    }
}

impl Event {
    pub fn deserialize(buf: &mut &[u8]) -> Result<Self, ParseError> {
        let event_type: EventType = types::read_string(buf)?.parse()?;
        match event_type {
            EventType::TopologyChange => {
                Ok(Self::TopologyChange(TopologyChangeEvent::deserialize(buf)?))
            }
            EventType::StatusChange => Ok(Self::StatusChange(StatusChangeEvent::deserialize(buf)?)),
            EventType::SchemaChange => Ok(Self::SchemaChange(SchemaChangeEvent::deserialize(buf)?)),
        }
    }

    /// Writes the event body, as a server would.
    pub fn serialize(&self, buf: &mut impl BufMut) -> Result<(), std::num::TryFromIntError> {
        match self {
            Event::TopologyChange(e) => {
                types::write_string(&EventType::TopologyChange.to_string(), buf)?;
                let (change, addr) = match e {
                    TopologyChangeEvent::NewNode(addr) => ("NEW_NODE", addr),
                    TopologyChangeEvent::RemovedNode(addr) => ("REMOVED_NODE", addr),
                };
                types::write_string(change, buf)?;
                types::write_inet(*addr, buf);
            }
            Event::StatusChange(e) => {
                types::write_string(&EventType::StatusChange.to_string(), buf)?;
                let (change, addr) = match e {
                    StatusChangeEvent::Up(addr) => ("UP", addr),
                    StatusChangeEvent::Down(addr) => ("DOWN", addr),
                };
                types::write_string(change, buf)?;
                types::write_inet(*addr, buf);
            }
            Event::SchemaChange(e) => {
                types::write_string(&EventType::SchemaChange.to_string(), buf)?;
                e.serialize(buf)?;
            }
        }
        Ok(())
    }
}

impl TopologyChangeEvent {
    fn deserialize(buf: &mut &[u8]) -> Result<Self, ParseError> {
        let type_of_change = types::read_string(buf)?;
        let addr = types::read_inet(buf)?;

        match type_of_change {
            "NEW_NODE" => Ok(Self::NewNode(addr)),
            "REMOVED_NODE" => Ok(Self::RemovedNode(addr)),
            _ => Err(ParseError::BadIncomingData(format!(
                "Invalid type of change ({}) in TopologyChangeEvent",
                type_of_change
            ))),
        }
    }
}

impl StatusChangeEvent {
    fn deserialize(buf: &mut &[u8]) -> Result<Self, ParseError> {
        let type_of_change = types::read_string(buf)?;
        let addr = types::read_inet(buf)?;

        match type_of_change {
            "UP" => Ok(Self::Up(addr)),
            "DOWN" => Ok(Self::Down(addr)),
            _ => Err(ParseError::BadIncomingData(format!(
                "Invalid type of status change ({}) in StatusChangeEvent",
                type_of_change
            ))),
        }
    }
}

impl SchemaChangeEvent {
    pub fn deserialize(buf: &mut &[u8]) -> Result<Self, ParseError> {
        let change_type = match types::read_string(buf)? {
            "CREATED" => SchemaChangeType::Created,
            "UPDATED" => SchemaChangeType::Updated,
            "DROPPED" => SchemaChangeType::Dropped,
            other => {
                return Err(ParseError::BadIncomingData(format!(
                    "Invalid type of schema change ({}) in SchemaChangeEvent",
                    other
                )))
            }
        };

        let target = types::read_string(buf)?;
        let keyspace_name = types::read_string(buf)?.to_owned();

        match target {
            "KEYSPACE" => Ok(Self::KeyspaceChange {
                change_type,
                keyspace_name,
            }),
            "TABLE" => Ok(Self::TableChange {
                change_type,
                keyspace_name,
                object_name: types::read_string(buf)?.to_owned(),
            }),
            "TYPE" => Ok(Self::OtherChange {
                change_type,
                target: target.to_owned(),
                keyspace_name,
                object_name: types::read_string(buf)?.to_owned(),
                arguments: Vec::new(),
            }),
            "FUNCTION" | "AGGREGATE" => Ok(Self::OtherChange {
                change_type,
                target: target.to_owned(),
                keyspace_name,
                object_name: types::read_string(buf)?.to_owned(),
                arguments: types::read_string_list(buf)?,
            }),
            _ => Err(ParseError::BadIncomingData(format!(
                "Invalid type of schema change target ({}) in SchemaChangeEvent",
                target
            ))),
        }
    }

    pub fn serialize(&self, buf: &mut impl BufMut) -> Result<(), std::num::TryFromIntError> {
        match self {
            SchemaChangeEvent::KeyspaceChange {
                change_type,
                keyspace_name,
            } => {
                types::write_string(change_type.as_str(), buf)?;
                types::write_string("KEYSPACE", buf)?;
                types::write_string(keyspace_name, buf)?;
            }
            SchemaChangeEvent::TableChange {
                change_type,
                keyspace_name,
                object_name,
            } => {
                types::write_string(change_type.as_str(), buf)?;
                types::write_string("TABLE", buf)?;
                types::write_string(keyspace_name, buf)?;
                types::write_string(object_name, buf)?;
            }
            SchemaChangeEvent::OtherChange {
                change_type,
                target,
                keyspace_name,
                object_name,
                arguments,
            } => {
                types::write_string(change_type.as_str(), buf)?;
                types::write_string(target, buf)?;
                types::write_string(keyspace_name, buf)?;
                types::write_string(object_name, buf)?;
                if target != "TYPE" {
                    types::write_string_list(arguments, buf)?;
                }
            }
        }
        Ok(())
    }

    pub fn keyspace_name(&self) -> &str {
        match self {
            SchemaChangeEvent::KeyspaceChange { keyspace_name, .. }
            | SchemaChangeEvent::TableChange { keyspace_name, .. }
            | SchemaChangeEvent::OtherChange { keyspace_name, .. } => keyspace_name,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    #[test]
    fn status_change_event_roundtrip() {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 3)), 9042);
        let event = Event::StatusChange(StatusChangeEvent::Down(addr));
        let mut buf = Vec::new();
        event.serialize(&mut buf).unwrap();
        assert_eq!(Event::deserialize(&mut &buf[..]).unwrap(), event);
    }

    #[test]
    fn function_change_carries_arguments() {
        let event = Event::SchemaChange(SchemaChangeEvent::OtherChange {
            change_type: SchemaChangeType::Created,
            target: "FUNCTION".to_owned(),
            keyspace_name: "ks".to_owned(),
            object_name: "f".to_owned(),
            arguments: vec!["int".to_owned(), "text".to_owned()],
        });
        let mut buf = Vec::new();
        event.serialize(&mut buf).unwrap();
        assert_eq!(Event::deserialize(&mut &buf[..]).unwrap(), event);
    }

    #[test]
    fn unknown_event_type_is_rejected() {
        let mut buf = Vec::new();
        types::write_string("SOMETHING_ELSE", &mut buf).unwrap();
        assert!(Event::deserialize(&mut &buf[..]).is_err());
    }
}
