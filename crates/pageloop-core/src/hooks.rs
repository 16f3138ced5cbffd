//! Lifecycle hooks: ordered callbacks per pipeline event

use std::collections::HashMap;

use crate::dispatch::Response;
use crate::document::{Document, Node};
use crate::environment::ExtractionEnvironment;
use crate::error::ExtractError;
use crate::record::Record;

/// Pipeline stage a hook is attached to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HookEvent {
    /// Document parsed, before the loop selector runs
    Before,
    /// Before extracting a record from a node
    BeforeExtract,
    /// After a record was built from a node
    AfterExtract,
    /// After every node of the document was processed
    After,
    /// Records of one response are ready
    Data,
}

impl HookEvent {
    pub fn from_name(s: &str) -> Option<Self> {
        match s {
            "before" => Some(Self::Before),
            "before_extract" => Some(Self::BeforeExtract),
            "after_extract" => Some(Self::AfterExtract),
            "after" => Some(Self::After),
            "data" => Some(Self::Data),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Before => "before",
            Self::BeforeExtract => "before_extract",
            Self::AfterExtract => "after_extract",
            Self::After => "after",
            Self::Data => "data",
        }
    }
}

impl std::fmt::Display for HookEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Arguments delivered with each event
#[derive(Debug, Clone, Copy)]
pub enum HookArgs<'h, 'd> {
    Before(&'h Document),
    BeforeExtract(&'h Node<'d>),
    AfterExtract(&'h Node<'d>, &'h Record),
    After(&'h [Record]),
    Data(&'h [Record], &'h Response),
}

impl HookArgs<'_, '_> {
    pub fn event(&self) -> HookEvent {
        match self {
            Self::Before(_) => HookEvent::Before,
            Self::BeforeExtract(_) => HookEvent::BeforeExtract,
            Self::AfterExtract(..) => HookEvent::AfterExtract,
            Self::After(_) => HookEvent::After,
            Self::Data(..) => HookEvent::Data,
        }
    }
}

pub type Hook =
    Box<dyn Fn(&ExtractionEnvironment<'_>, &HookArgs<'_, '_>) -> anyhow::Result<()> + Send + Sync>;

/// Event → handlers, in registration order
#[derive(Default)]
pub struct HookRegistry {
    hooks: HashMap<HookEvent, Vec<Hook>>,
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let counts: HashMap<&str, usize> = self
            .hooks
            .iter()
            .map(|(event, handlers)| (event.name(), handlers.len()))
            .collect();
        f.debug_struct("HookRegistry")
            .field("handlers", &counts)
            .finish()
    }
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler; earlier handlers for the same event are kept
    pub fn register<F>(&mut self, event: HookEvent, handler: F)
    where
        F: Fn(&ExtractionEnvironment<'_>, &HookArgs<'_, '_>) -> anyhow::Result<()>
            + Send
            + Sync
            + 'static,
    {
        self.hooks.entry(event).or_default().push(Box::new(handler));
    }

    pub fn count(&self, event: HookEvent) -> usize {
        self.hooks.get(&event).map_or(0, Vec::len)
    }

    /// Run every handler for `args.event()` in order; no handlers is a no-op.
    ///
    /// Stops at the first failing handler.
    pub fn dispatch(
        &self,
        env: &ExtractionEnvironment<'_>,
        args: HookArgs<'_, '_>,
    ) -> Result<(), ExtractError> {
        let event = args.event();
        let Some(handlers) = self.hooks.get(&event) else {
            return Ok(());
        };
        for handler in handlers {
            env.run(|env| handler(env, &args))
                .map_err(|source| ExtractError::HookFailed {
                    event: event.name(),
                    source,
                })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::RunState;
    use crate::scraper::ScraperOptions;
    use std::sync::{Arc, Mutex};

    #[test]
    fn event_names_roundtrip() {
        for event in [
            HookEvent::Before,
            HookEvent::BeforeExtract,
            HookEvent::AfterExtract,
            HookEvent::After,
            HookEvent::Data,
        ] {
            assert_eq!(HookEvent::from_name(event.name()), Some(event));
        }
        assert_eq!(HookEvent::from_name("on_data"), None);
    }

    #[test]
    fn handlers_accumulate_in_registration_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut registry = HookRegistry::new();
        for tag in ["first", "second", "third"] {
            let seen = seen.clone();
            registry.register(HookEvent::After, move |_, _| {
                seen.lock().unwrap().push(tag);
                Ok(())
            });
        }
        assert_eq!(registry.count(HookEvent::After), 3);

        let options = ScraperOptions::default();
        let state = RunState::default();
        let env = ExtractionEnvironment::new(&options, &state);
        registry.dispatch(&env, HookArgs::After(&[])).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn unregistered_event_is_noop() {
        let registry = HookRegistry::new();
        let options = ScraperOptions::default();
        let state = RunState::default();
        let env = ExtractionEnvironment::new(&options, &state);
        assert!(registry.dispatch(&env, HookArgs::After(&[])).is_ok());
        assert_eq!(registry.count(HookEvent::Data), 0);
    }

    #[test]
    fn failing_handler_stops_dispatch() {
        let calls = Arc::new(Mutex::new(0));
        let mut registry = HookRegistry::new();
        registry.register(HookEvent::After, |_, _| anyhow::bail!("nope"));
        let counter = calls.clone();
        registry.register(HookEvent::After, move |_, _| {
            *counter.lock().unwrap() += 1;
            Ok(())
        });

        let options = ScraperOptions::default();
        let state = RunState::default();
        let env = ExtractionEnvironment::new(&options, &state);
        let err = registry.dispatch(&env, HookArgs::After(&[])).unwrap_err();
        assert!(matches!(err, ExtractError::HookFailed { event: "after", .. }));
        assert_eq!(*calls.lock().unwrap(), 0);
    }

    #[test]
    fn handlers_only_see_their_event() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut registry = HookRegistry::new();
        let log = seen.clone();
        registry.register(HookEvent::Before, move |_, args| {
            log.lock().unwrap().push(args.event());
            Ok(())
        });

        let options = ScraperOptions::default();
        let state = RunState::default();
        let env = ExtractionEnvironment::new(&options, &state);
        registry.dispatch(&env, HookArgs::After(&[])).unwrap();
        assert!(seen.lock().unwrap().is_empty());
    }
}
