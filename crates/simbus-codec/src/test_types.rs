//! Encodable fixtures shared by the codec tests.

use crate::{
    CodecError, Encodable, FieldReader, FieldWriter, TypeRegistry, read_object,
    read_object_list,
};

#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct Reading {
    pub sensor: String,
    pub value: f64,
    /// Derived in `decoding_completed`, never encoded.
    pub label: String,
}

impl Reading {
    pub(crate) fn new(sensor: &str, value: f64) -> Self {
        let mut reading = Self {
            sensor: sensor.to_owned(),
            value,
            label: String::new(),
        };
        reading.decoding_completed();
        reading
    }
}

impl Encodable for Reading {
    fn type_tag(&self) -> &'static str {
        "Reading"
    }

    fn encode(&self, writer: &mut dyn FieldWriter) -> Result<(), CodecError> {
        writer.put_str("sensor", &self.sensor)?;
        writer.put_f64("value", self.value)
    }

    fn decode(&mut self, reader: &dyn FieldReader) -> Result<(), CodecError> {
        self.sensor = reader.get_str("sensor")?;
        self.value = reader.get_f64("value")?;
        Ok(())
    }

    fn decoding_completed(&mut self) {
        self.label = format!("{}={}", self.sensor, self.value);
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct Station {
    pub name: String,
    pub active: bool,
    pub id: i64,
    pub tags: Vec<String>,
    pub samples: Vec<f64>,
    pub counts: Vec<i64>,
    pub blob: Vec<u8>,
    pub latest: Option<Reading>,
    pub history: Vec<Reading>,
}

impl Encodable for Station {
    fn type_tag(&self) -> &'static str {
        "Station"
    }

    fn encode(&self, writer: &mut dyn FieldWriter) -> Result<(), CodecError> {
        writer.put_str("name", &self.name)?;
        writer.put_bool("active", self.active)?;
        writer.put_i64("id", self.id)?;
        writer.put_str_list("tags", &self.tags)?;
        writer.put_f64_list("samples", &self.samples)?;
        writer.put_i64_list("counts", &self.counts)?;
        writer.put_bytes("blob", &self.blob)?;
        if let Some(latest) = &self.latest {
            writer.put_object("latest", latest)?;
        }
        let history: Vec<&dyn Encodable> =
            self.history.iter().map(|r| r as &dyn Encodable).collect();
        writer.put_object_list("history", &history)
    }

    fn decode(&mut self, reader: &dyn FieldReader) -> Result<(), CodecError> {
        self.name = reader.get_str("name")?;
        self.active = reader.get_bool("active")?;
        self.id = reader.get_i64("id")?;
        self.tags = reader.get_str_list("tags")?;
        self.samples = reader.get_f64_list("samples")?;
        self.counts = reader.get_i64_list("counts")?;
        self.blob = reader.get_bytes("blob")?;
        self.latest = if reader.has_field("latest") {
            Some(read_object(reader, "latest")?)
        } else {
            None
        };
        self.history = read_object_list(reader, "history")?;
        Ok(())
    }
}

pub(crate) fn sample_station() -> Station {
    Station {
        name: "north".into(),
        active: true,
        id: -42,
        tags: vec!["a".into(), "b".into()],
        samples: vec![0.5, -1.25, 1e10],
        counts: vec![1, 2, i64::MAX],
        blob: vec![0, 1, 2, 254, 255],
        latest: Some(Reading::new("t1", 20.5)),
        history: vec![Reading::new("t0", 19.0), Reading::new("t1", 20.5)],
    }
}

pub(crate) fn test_registry() -> TypeRegistry {
    let mut registry = TypeRegistry::new();
    let _ = registry.register::<Reading>().register::<Station>();
    registry
}
