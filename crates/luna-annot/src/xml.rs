//! XML annotation readers/writers for the two schemas Luna accepts:
//! the PSG "`ScoredEvents`" schema (Profusion-style, sleep stages as a flat
//! `SleepStages` integer-code list) and the in-house "Annotations" schema
//! (explicit `Classes`/`Instances` sections).

use luna_core::annot::AnnotationSet;
use luna_core::error::LunaError;
use luna_core::tick::{seconds_to_ticks, Interval};
use luna_core::value::{Value, ValueType};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::collections::HashMap;
use std::io::Cursor;

/// Integer sleep-stage codes as Profusion-family scorers emit them in
/// `SleepStages`, one per 30s epoch.
fn profusion_code_to_label(code: &str) -> &'static str {
    match code.trim() {
        "0" => "wake",
        "1" => "N1",
        "2" => "N2",
        "3" => "N3",
        "4" => "N3", // N4 collapses into N3
        "5" => "REM",
        _ => "unscored",
    }
}

/// Parse a PSG `ScoredEvents` document: one `<ScoredEvent>` per event plus,
/// if present, a `<SleepStages>` block expanded one instance per 30s epoch.
///
/// # Errors
/// Returns [`LunaError::MalformedInput`] on unparseable XML structure or
/// numeric fields.
pub fn read_psg_xml(xml: &str) -> Result<AnnotationSet, LunaError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut set = AnnotationSet::new();
    let mut buf = Vec::new();

    let mut in_scored_event = false;
    let mut in_sleep_stages = false;
    let mut cur_tag = String::new();
    let mut event_concept = String::new();
    let mut start_s: Option<f64> = None;
    let mut duration_s: Option<f64> = None;
    let mut notes = String::new();
    let mut signal_location = String::new();
    let mut stage_codes = String::new();

    loop {
        match reader
            .read_event_into(&mut buf)
            .map_err(|e| LunaError::malformed("psg xml", format!("{e}")))?
        {
            Event::Eof => break,
            Event::Start(e) => {
                let name = tag_name(&e);
                match name.as_str() {
                    "ScoredEvent" => {
                        in_scored_event = true;
                        event_concept.clear();
                        start_s = None;
                        duration_s = None;
                        notes.clear();
                        signal_location.clear();
                    }
                    "SleepStages" => in_sleep_stages = true,
                    _ => {}
                }
                cur_tag = name;
            }
            Event::Text(t) => {
                let text = t
                    .unescape()
                    .map_err(|e| LunaError::malformed("psg xml text", format!("{e}")))?
                    .into_owned();
                if in_scored_event {
                    match cur_tag.as_str() {
                        "EventConcept" | "Name" => event_concept = text,
                        "Start" => {
                            start_s = Some(text.parse().map_err(|e| {
                                LunaError::malformed("ScoredEvent/Start", format!("{e}"))
                            })?);
                        }
                        "Duration" => {
                            duration_s = Some(text.parse().map_err(|e| {
                                LunaError::malformed("ScoredEvent/Duration", format!("{e}"))
                            })?);
                        }
                        "Notes" => notes = text,
                        "SignalLocation" => signal_location = text,
                        _ => {}
                    }
                } else if in_sleep_stages && cur_tag == "SleepStages" {
                    stage_codes.push_str(text.trim());
                    stage_codes.push(' ');
                }
            }
            Event::End(e) => {
                let name = tag_name_end(&e);
                if name == "ScoredEvent" && in_scored_event {
                    in_scored_event = false;
                    let start = start_s.ok_or_else(|| {
                        LunaError::malformed("ScoredEvent", "missing Start")
                    })?;
                    let dur = duration_s.unwrap_or(0.0);
                    let interval = Interval::new(
                        seconds_to_ticks(start),
                        seconds_to_ticks(start + dur),
                    );
                    let mut meta = HashMap::new();
                    if !notes.is_empty() {
                        meta.insert("notes".to_string(), Value::Text(notes.clone()));
                    }
                    let channel = if signal_location.is_empty() {
                        ".".to_string()
                    } else {
                        signal_location.clone()
                    };
                    set.add(&event_concept, ".".to_string(), interval, channel, meta)?;
                } else if name == "SleepStages" {
                    in_sleep_stages = false;
                }
            }
            _ => {}
        }
        buf.clear();
    }

    if !stage_codes.trim().is_empty() {
        for (i, code) in stage_codes.split_whitespace().enumerate() {
            let label = profusion_code_to_label(code);
            if label == "unscored" {
                continue;
            }
            let epoch_start = i as f64 * 30.0;
            let interval = Interval::new(
                seconds_to_ticks(epoch_start),
                seconds_to_ticks(epoch_start + 30.0),
            );
            set.add(label, ".".to_string(), interval, ".".to_string(), HashMap::new())?;
        }
    }

    Ok(set)
}

/// Parse the in-house `Annotations` schema: explicit `Classes`/`Class` type
/// declarations followed by `Instances`/`Instance` rows.
///
/// # Errors
/// Returns [`LunaError::MalformedInput`] on unparseable XML or a reference
/// to an undeclared variable name.
pub fn read_annotations_xml(xml: &str) -> Result<AnnotationSet, LunaError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut set = AnnotationSet::new();
    let mut buf = Vec::new();

    let mut class_vars: HashMap<String, Vec<(String, ValueType)>> = HashMap::new();
    let mut cur_tag = String::new();
    let mut in_class = false;
    let mut class_name = String::new();
    let mut class_desc = String::new();
    let mut class_vars_buf: Vec<(String, ValueType)> = Vec::new();

    let mut in_instance = false;
    let mut inst_name = String::new();
    let mut inst_start: Option<f64> = None;
    let mut inst_duration: Option<f64> = None;
    let mut inst_channel = String::new();
    let mut inst_values: HashMap<String, String> = HashMap::new();
    let mut inst_class = String::new();

    loop {
        match reader
            .read_event_into(&mut buf)
            .map_err(|e| LunaError::malformed("annotations xml", format!("{e}")))?
        {
            Event::Eof => break,
            Event::Start(e) | Event::Empty(e) => {
                let name = tag_name(&e);
                match name.as_str() {
                    "Class" => {
                        in_class = true;
                        class_name.clear();
                        class_desc.clear();
                        class_vars_buf.clear();
                    }
                    "Instance" => {
                        in_instance = true;
                        inst_name.clear();
                        inst_start = None;
                        inst_duration = None;
                        inst_channel.clear();
                        inst_values.clear();
                        inst_class.clear();
                        for attr in e.attributes().flatten() {
                            if attr.key.as_ref() == b"class" {
                                inst_class = String::from_utf8_lossy(&attr.value).into_owned();
                            }
                        }
                    }
                    _ => {}
                }
                cur_tag = name;
            }
            Event::Text(t) => {
                let text = t
                    .unescape()
                    .map_err(|e| LunaError::malformed("annotations xml text", format!("{e}")))?
                    .into_owned();
                if in_class {
                    match cur_tag.as_str() {
                        "Name" => class_name = text,
                        "Description" => class_desc = text,
                        "Variable" => {
                            if let Some((n, t)) = text.split_once(':') {
                                let ty = ValueType::parse(t.trim())?;
                                class_vars_buf.push((n.trim().to_string(), ty));
                            }
                        }
                        _ => {}
                    }
                } else if in_instance {
                    match cur_tag.as_str() {
                        "Name" => inst_name = text,
                        "Start" => {
                            inst_start = Some(text.parse().map_err(|e| {
                                LunaError::malformed("Instance/Start", format!("{e}"))
                            })?);
                        }
                        "Duration" => {
                            inst_duration = Some(text.parse().map_err(|e| {
                                LunaError::malformed("Instance/Duration", format!("{e}"))
                            })?);
                        }
                        "Channel" => inst_channel = text,
                        other => {
                            inst_values.insert(other.to_string(), text);
                        }
                    }
                }
            }
            Event::End(e) => {
                let name = tag_name_end(&e);
                if name == "Class" && in_class {
                    in_class = false;
                    let c = set.class_or_create(&class_name);
                    c.set_description(class_desc.clone());
                    for (n, t) in &class_vars_buf {
                        c.declare_variable(n.clone(), *t);
                    }
                    class_vars.insert(class_name.clone(), class_vars_buf.clone());
                } else if name == "Instance" && in_instance {
                    in_instance = false;
                    let start = inst_start.ok_or_else(|| {
                        LunaError::malformed("Instance", "missing Start")
                    })?;
                    let dur = inst_duration.unwrap_or(0.0);
                    let interval = Interval::new(
                        seconds_to_ticks(start),
                        seconds_to_ticks(start + dur),
                    );
                    let declared = class_vars.get(&inst_class).cloned().unwrap_or_default();
                    let mut meta = HashMap::new();
                    for (k, raw) in &inst_values {
                        let ty = declared
                            .iter()
                            .find(|(n, _)| n == k)
                            .map(|(_, t)| *t)
                            .unwrap_or(ValueType::Text);
                        meta.insert(k.clone(), Value::parse(ty, raw)?);
                    }
                    let channel = if inst_channel.is_empty() {
                        ".".to_string()
                    } else {
                        inst_channel.clone()
                    };
                    let id = if inst_name.is_empty() {
                        ".".to_string()
                    } else {
                        inst_name.clone()
                    };
                    set.add(&inst_class, id, interval, channel, meta)?;
                }
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(set)
}

/// Write an [`AnnotationSet`] to the in-house `Annotations` XML schema.
///
/// # Errors
/// Returns [`LunaError::MalformedInput`] if the underlying XML writer
/// fails (should not occur given well-formed in-memory data).
pub fn write_annotations_xml(set: &AnnotationSet) -> Result<String, LunaError> {
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);
    let wrap = |e: quick_xml::Error| LunaError::malformed("annotations xml write", format!("{e}"));

    writer
        .write_event(Event::Start(BytesStart::new("Annotations")))
        .map_err(wrap)?;

    writer
        .write_event(Event::Start(BytesStart::new("Classes")))
        .map_err(wrap)?;
    for name in set.names() {
        let Some(class) = set.class(name) else { continue };
        writer
            .write_event(Event::Start(BytesStart::new("Class")))
            .map_err(wrap)?;
        write_text_elem(&mut writer, "Name", class.name())?;
        write_text_elem(&mut writer, "Description", class.description())?;
        let mut vars: Vec<(&String, &ValueType)> = class.types().iter().collect();
        vars.sort_by_key(|(n, _)| n.as_str());
        for (vname, vty) in vars {
            write_text_elem(&mut writer, "Variable", &format!("{vname}:{vty}"))?;
        }
        writer
            .write_event(Event::End(BytesEnd::new("Class")))
            .map_err(wrap)?;
    }
    writer
        .write_event(Event::End(BytesEnd::new("Classes")))
        .map_err(wrap)?;

    writer
        .write_event(Event::Start(BytesStart::new("Instances")))
        .map_err(wrap)?;
    for name in set.names() {
        let Some(class) = set.class(name) else { continue };
        for inst in class.instances() {
            let mut start_tag = BytesStart::new("Instance");
            start_tag.push_attribute(("class", class.name()));
            writer.write_event(Event::Start(start_tag)).map_err(wrap)?;
            write_text_elem(&mut writer, "Name", &inst.id)?;
            write_text_elem(
                &mut writer,
                "Start",
                &format!("{}", luna_core::tick::ticks_to_seconds(inst.interval.start)),
            )?;
            write_text_elem(
                &mut writer,
                "Duration",
                &format!(
                    "{}",
                    luna_core::tick::ticks_to_seconds(inst.interval.stop)
                        - luna_core::tick::ticks_to_seconds(inst.interval.start)
                ),
            )?;
            write_text_elem(&mut writer, "Channel", &inst.channel)?;
            let mut keys: Vec<&String> = inst.meta.keys().collect();
            keys.sort();
            for k in keys {
                write_text_elem(&mut writer, k, &inst.meta[k].to_tabular())?;
            }
            writer
                .write_event(Event::End(BytesEnd::new("Instance")))
                .map_err(wrap)?;
        }
    }
    writer
        .write_event(Event::End(BytesEnd::new("Instances")))
        .map_err(wrap)?;

    writer
        .write_event(Event::End(BytesEnd::new("Annotations")))
        .map_err(wrap)?;

    let bytes = writer.into_inner().into_inner();
    String::from_utf8(bytes).map_err(|e| LunaError::malformed("annotations xml write", format!("{e}")))
}

fn write_text_elem<W: std::io::Write>(
    writer: &mut Writer<W>,
    tag: &str,
    text: &str,
) -> Result<(), LunaError> {
    let wrap = |e: quick_xml::Error| LunaError::malformed("xml write", format!("{e}"));
    writer
        .write_event(Event::Start(BytesStart::new(tag)))
        .map_err(wrap)?;
    writer
        .write_event(Event::Text(BytesText::new(text)))
        .map_err(wrap)?;
    writer
        .write_event(Event::End(BytesEnd::new(tag)))
        .map_err(wrap)?;
    Ok(())
}

fn tag_name(e: &BytesStart) -> String {
    String::from_utf8_lossy(e.name().as_ref()).into_owned()
}

fn tag_name_end(e: &BytesEnd) -> String {
    String::from_utf8_lossy(e.name().as_ref()).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profusion_codes_map_correctly() {
        assert_eq!(profusion_code_to_label("0"), "wake");
        assert_eq!(profusion_code_to_label("4"), "N3");
        assert_eq!(profusion_code_to_label("5"), "REM");
    }

    #[test]
    fn reads_scored_events() {
        let xml = r#"<PSGAnnotation>
          <ScoredEvents>
            <ScoredEvent>
              <EventConcept>Arousal</EventConcept>
              <Start>120.0</Start>
              <Duration>10.0</Duration>
            </ScoredEvent>
          </ScoredEvents>
        </PSGAnnotation>"#;
        let set = read_psg_xml(xml).unwrap();
        assert_eq!(set.names(), &["Arousal".to_string()]);
    }

    #[test]
    fn reads_sleep_stages() {
        let xml = r#"<PSGAnnotation><SleepStages>0 0 1 2 5</SleepStages></PSGAnnotation>"#;
        let mut set = read_psg_xml(xml).unwrap();
        assert!(set.class_mut("wake").is_some());
        assert!(set.class_mut("REM").is_some());
    }

    #[test]
    fn round_trips_annotations_schema() {
        let xml = r#"<Annotations>
          <Classes>
            <Class><Name>arousal</Name><Description>arousal events</Description></Class>
          </Classes>
          <Instances>
            <Instance class="arousal">
              <Name>.</Name><Start>10</Start><Duration>5</Duration><Channel>.</Channel>
            </Instance>
          </Instances>
        </Annotations>"#;
        let set = read_annotations_xml(xml).unwrap();
        assert_eq!(set.names(), &["arousal".to_string()]);
        let written = write_annotations_xml(&set).unwrap();
        assert!(written.contains("arousal"));
    }
}
