//! Event pipeline: decomposition, ignore filtering and dispatch.

use std::sync::Arc;

use rflink_metrics::{metric_defs, ConnectionLabels};
use rflink_protocol::{decompose, DecodedPacket, Event};
use tracing::debug;

/// Ordered list of event id patterns to suppress.
///
/// A pattern matches an id exactly, or as a prefix when it ends in `*`
/// (`newkaku_*`). No other wildcard forms are recognised.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IgnoreList {
    patterns: Vec<String>,
}

impl IgnoreList {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        IgnoreList {
            patterns: patterns.into_iter().map(Into::into).collect(),
        }
    }

    /// Parse a comma separated list, skipping empty entries.
    pub fn from_comma_separated(list: &str) -> Self {
        IgnoreList::new(list.split(',').map(str::trim).filter(|p| !p.is_empty()))
    }

    /// Check an event id against every pattern.
    pub fn matches(&self, event_id: &str) -> bool {
        self.patterns.iter().any(|pattern| match pattern.strip_suffix('*') {
            Some(prefix) => event_id.starts_with(prefix),
            None => event_id == pattern,
        })
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// Callback receiving each surviving event.
pub type EventCallback = Arc<dyn Fn(Event) + Send + Sync>;

/// What to do with events that pass the ignore list.
#[derive(Clone, Default)]
pub enum EventDispatch {
    /// Do not decompose packets at all.
    Disabled,
    /// Print one line per event to stdout.
    #[default]
    Print,
    /// Hand each event to a callback.
    Callback(EventCallback),
}

impl std::fmt::Debug for EventDispatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventDispatch::Disabled => f.write_str("Disabled"),
            EventDispatch::Print => f.write_str("Print"),
            EventDispatch::Callback(_) => f.write_str("Callback(..)"),
        }
    }
}

/// Turns packets into filtered events.
#[derive(Debug, Clone, Default)]
pub struct EventPipeline {
    ignore: IgnoreList,
    dispatch: EventDispatch,
}

impl EventPipeline {
    pub fn new(ignore: IgnoreList, dispatch: EventDispatch) -> Self {
        if !ignore.is_empty() {
            debug!("ignoring: {:?}", ignore.patterns());
        }
        EventPipeline { ignore, dispatch }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self.dispatch, EventDispatch::Disabled)
    }

    /// Decompose a packet and dispatch its events. Returns the number of
    /// events delivered.
    pub fn process(&self, packet: &DecodedPacket, labels: &ConnectionLabels) -> usize {
        if !self.is_enabled() {
            return 0;
        }
        self.dispatch_events(decompose(packet), labels)
    }

    /// Filter and dispatch already decomposed events.
    pub fn dispatch_events(&self, events: Vec<Event>, labels: &ConnectionLabels) -> usize {
        let labels = labels.to_labels();
        let mut delivered = 0;
        for event in events {
            if self.ignore.matches(event.id()) {
                debug!("ignoring event with id: {}", event.id());
                metrics::counter!(metric_defs::EVENTS_IGNORED.name, &labels).increment(1);
                continue;
            }
            debug!("got event: {:?}", event);
            match &self.dispatch {
                EventDispatch::Disabled => continue,
                EventDispatch::Print => println!("{}", event),
                EventDispatch::Callback(callback) => callback(event),
            }
            metrics::counter!(metric_defs::EVENTS_DISPATCHED.name, &labels).increment(1);
            delivered += 1;
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use rflink_protocol::decode_packet;

    #[test]
    fn test_ignore_exact_and_prefix() {
        let ignore = IgnoreList::new(["test1_00", "test2_*"]);
        assert!(ignore.matches("test1_00"));
        assert!(ignore.matches("test2_00"));
        assert!(ignore.matches("test2_"));
        assert!(!ignore.matches("test1_001"));
        assert!(!ignore.matches("test3_00"));
    }

    #[test]
    fn test_ignore_star_only_anchors_at_end() {
        let ignore = IgnoreList::new(["*_temp"]);
        assert!(!ignore.matches("alectov1_0334_temp"));
        assert!(ignore.matches("*_temp"));
    }

    #[test]
    fn test_ignore_from_comma_separated() {
        let ignore = IgnoreList::from_comma_separated("newkaku_*, kaku_000041_1,,");
        assert_eq!(ignore.patterns(), &["newkaku_*".to_string(), "kaku_000041_1".to_string()]);
        assert!(IgnoreList::from_comma_separated("").is_empty());
    }

    #[test]
    fn test_pipeline_filters_per_event() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let pipeline = EventPipeline::new(
            IgnoreList::new(["upmesic_0001_hum", "upmesic_0001_update_time"]),
            EventDispatch::Callback(Arc::new(move |event: Event| {
                sink.lock().push(event.id().to_string())
            })),
        );

        let packet = decode_packet("20;2D;UPM/Esic;ID=0001;TEMP=00cf;HUM=16;BAT=OK;").unwrap();
        let labels = ConnectionLabels::new("tcp", "test");
        assert_eq!(pipeline.process(&packet, &labels), 2);
        assert_eq!(
            *seen.lock(),
            vec!["upmesic_0001_temp".to_string(), "upmesic_0001_bat".to_string()]
        );
    }

    #[test]
    fn test_default_pipeline_prints() {
        let pipeline = EventPipeline::default();
        assert!(pipeline.is_enabled());
        assert!(matches!(pipeline.dispatch, EventDispatch::Print));

        let packet = decode_packet("20;06;Kaku;ID=41;SWITCH=1;CMD=ON;").unwrap();
        assert_eq!(pipeline.process(&packet, &ConnectionLabels::new("tcp", "test")), 1);
    }

    #[test]
    fn test_disabled_pipeline_does_nothing() {
        let pipeline = EventPipeline::new(IgnoreList::default(), EventDispatch::Disabled);
        assert!(!pipeline.is_enabled());
        let packet = decode_packet("20;06;Kaku;ID=41;SWITCH=1;CMD=ON;").unwrap();
        assert_eq!(pipeline.process(&packet, &ConnectionLabels::new("tcp", "test")), 0);
    }
}
