//! Streaming response dispatcher.
//!
//! Demultiplexes one interleaved event stream into independent render
//! objects. Every text block and tool call occupies a *slot* keyed by its
//! content-block index; exactly one index is current at a time. Moving to a
//! new index finalizes the previous slot if it holds text. Tool slots stay
//! open until their output arrives. Reasoning is a separate, non-indexed
//! buffer flushed once per signature.
//!
//! Events are handled strictly in arrival order, one at a time.

use std::collections::{BTreeMap, HashMap};

use futures::{Stream, StreamExt};
use serde_json::Value;
use tracing::{Instrument, Span};

use super::errors::DispatchError;
use super::events::{ReasoningChunk, StreamEvent};
use super::surface::{MessageKind, RenderId, RenderSurface};

/// Placeholder shown at the top of every reasoning message.
pub const THINKING_PLACEHOLDER: &str = "_Thinking..._ \n\n";

// ─── Slots ───────────────────────────────────────────────────────────────────

/// Whether a tool slot is still receiving arguments or has its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolPhase {
    Input,
    Output,
}

/// An open render object at one index.
#[derive(Debug, Clone, PartialEq)]
pub enum Slot {
    Text {
        render: RenderId,
        text: String,
    },
    Tool {
        render: RenderId,
        name: String,
        input: String,
        phase: ToolPhase,
    },
}

impl Slot {
    pub fn render(&self) -> &RenderId {
        match self {
            Slot::Text { render, .. } | Slot::Tool { render, .. } => render,
        }
    }
}

#[derive(Debug)]
struct ReasoningBuffer {
    render: RenderId,
    text: String,
}

// ─── Dispatcher ──────────────────────────────────────────────────────────────

/// Routes `StreamEvent`s for one turn onto a `RenderSurface`.
pub struct StreamDispatcher<S> {
    surface: S,
    span: Span,
    slots: BTreeMap<usize, Slot>,
    current: Option<usize>,
    /// Tool names seen for an index before its slot exists.
    pending_names: HashMap<usize, String>,
    reasoning: Option<ReasoningBuffer>,
    render_prefix: String,
    next_render: u64,
}

impl<S: RenderSurface> StreamDispatcher<S> {
    /// Create a dispatcher for one turn. All logging happens inside `span`.
    pub fn new(surface: S, span: Span) -> Self {
        let render_prefix = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
        Self {
            surface,
            span,
            slots: BTreeMap::new(),
            current: None,
            pending_names: HashMap::new(),
            reasoning: None,
            render_prefix,
            next_render: 0,
        }
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current
    }

    pub fn slot(&self, index: usize) -> Option<&Slot> {
        self.slots.get(&index)
    }

    pub fn active_slots(&self) -> usize {
        self.slots.len()
    }

    /// Consume a whole event stream.
    ///
    /// Returns `Err(DispatchError::Closed)` if the surface goes away; the
    /// caller should stop the turn without reporting an error.
    pub async fn run<St>(&mut self, events: St) -> Result<(), DispatchError>
    where
        St: Stream<Item = StreamEvent> + Send,
    {
        futures::pin_mut!(events);
        let mut handled = 0usize;
        while let Some(event) = events.next().await {
            self.dispatch(event).await?;
            handled += 1;
        }
        self.span.in_scope(|| {
            tracing::debug!(events = handled, open_slots = self.slots.len(), "stream drained");
        });
        Ok(())
    }

    /// Decode a JSON content item and dispatch it. Malformed items are
    /// logged and skipped.
    pub async fn dispatch_item(&mut self, item: &Value) -> Result<(), DispatchError> {
        match StreamEvent::from_content_item(item) {
            Ok(event) => self.dispatch(event).await,
            Err(DispatchError::Closed) => Err(DispatchError::Closed),
            Err(e) => {
                self.span.in_scope(|| {
                    tracing::warn!(error = %e, item = %item, "skipping malformed content item");
                });
                Ok(())
            }
        }
    }

    /// Handle one event.
    pub async fn dispatch(&mut self, event: StreamEvent) -> Result<(), DispatchError> {
        let span = self.span.clone();
        async move {
            tracing::trace!(kind = event.kind(), "dispatching event");
            match event {
                StreamEvent::Text { index, text } => self.on_text(index, &text).await,
                StreamEvent::Reasoning(chunk) => self.on_reasoning(chunk).await,
                StreamEvent::ToolUse {
                    index, name, input, ..
                } => self.on_tool_use(index, name, input).await,
                StreamEvent::ToolOutput { content, tool_name } => {
                    self.on_tool_output(&content, tool_name.as_deref()).await
                }
                StreamEvent::EndTurn => self.on_end_turn().await,
            }
        }
        .instrument(span)
        .await
    }

    // ─── Handlers ────────────────────────────────────────────────────────

    async fn on_text(&mut self, index: usize, text: &str) -> Result<(), DispatchError> {
        self.change_index(index).await?;

        if !matches!(self.slots.get(&index), Some(Slot::Text { .. })) {
            self.discard_slot(index);
            let render = self.next_render_id();
            self.surface
                .open_message(&render, MessageKind::Assistant, "")
                .await?;
            self.slots.insert(
                index,
                Slot::Text {
                    render,
                    text: String::new(),
                },
            );
        }

        if let Some(Slot::Text { render, text: acc }) = self.slots.get_mut(&index) {
            acc.push_str(text);
            self.surface.stream_token(render, text).await?;
        }
        Ok(())
    }

    async fn on_reasoning(&mut self, chunk: ReasoningChunk) -> Result<(), DispatchError> {
        match chunk {
            ReasoningChunk::Text(text) => {
                if self.reasoning.is_none() {
                    let render = self.next_render_id();
                    self.surface
                        .open_message(&render, MessageKind::Thinking, THINKING_PLACEHOLDER)
                        .await?;
                    self.reasoning = Some(ReasoningBuffer {
                        render,
                        text: String::new(),
                    });
                }
                if let Some(buffer) = self.reasoning.as_mut() {
                    buffer.text.push_str(&text);
                    self.surface.stream_token(&buffer.render, &text).await?;
                }
            }
            ReasoningChunk::Signature(_) => match self.reasoning.take() {
                Some(buffer) => {
                    tracing::debug!(chars = buffer.text.len(), "flushing reasoning");
                    self.surface.send_message(&buffer.render).await?;
                }
                None => tracing::debug!("signature with no pending reasoning, ignoring"),
            },
        }
        Ok(())
    }

    async fn on_tool_use(
        &mut self,
        index: usize,
        name: Option<String>,
        input: Option<String>,
    ) -> Result<(), DispatchError> {
        let name = match name.or_else(|| self.remembered_name(index)) {
            Some(name) => name,
            None => {
                tracing::warn!(index, "tool chunk without a known tool name, skipping");
                return Ok(());
            }
        };

        self.change_index(index).await?;
        self.remember_name(index, &name);

        let Some(input) = input else {
            return Ok(());
        };

        if !matches!(self.slots.get(&index), Some(Slot::Tool { .. })) {
            self.discard_slot(index);
            let render = self.next_render_id();
            tracing::debug!(index, tool = %name, render = %render, "opening tool step");
            self.surface
                .open_step(&render, &format!("MCP Tool: {name}"))
                .await?;
            self.pending_names.remove(&index);
            self.slots.insert(
                index,
                Slot::Tool {
                    render,
                    name,
                    input: String::new(),
                    phase: ToolPhase::Input,
                },
            );
        }

        if input.is_empty() {
            return Ok(());
        }
        if let Some(Slot::Tool {
            render, input: acc, ..
        }) = self.slots.get_mut(&index)
        {
            acc.push_str(&input);
            self.surface.stream_step(render, &input, true).await?;
        }
        Ok(())
    }

    /// Attach a tool result to its slot and finalize it.
    ///
    /// The slot is found by tool name, lowest index first. When no open
    /// tool slot has that name the current index is used, which can
    /// misattribute output if several calls to the same tool are in flight.
    async fn on_tool_output(
        &mut self,
        content: &str,
        tool_name: Option<&str>,
    ) -> Result<(), DispatchError> {
        let matched = tool_name.and_then(|wanted| {
            self.slots.iter().find_map(|(index, slot)| match slot {
                Slot::Tool { name, .. } if name == wanted => Some(*index),
                _ => None,
            })
        });

        match matched {
            Some(index) => self.change_index(index).await?,
            None => tracing::debug!(
                tool = ?tool_name,
                current = ?self.current,
                "no tool slot matches output, using current index"
            ),
        }

        let Some(index) = self.current else {
            tracing::warn!(tool = ?tool_name, "tool output with no current slot, dropping");
            return Ok(());
        };

        match self.slots.get_mut(&index) {
            Some(Slot::Tool { render, phase, .. }) => {
                *phase = ToolPhase::Output;
                let render = render.clone();
                self.surface.stream_step(&render, content, false).await?;
                self.surface.send_step(&render).await?;
                self.slots.remove(&index);
                self.pending_names.remove(&index);
            }
            _ => {
                tracing::warn!(index, tool = ?tool_name, "current slot is not a tool step, dropping output");
            }
        }
        Ok(())
    }

    async fn on_end_turn(&mut self) -> Result<(), DispatchError> {
        if let Some(index) = self.current {
            self.finalize_text(index).await?;
        }
        Ok(())
    }

    // ─── Slot Bookkeeping ────────────────────────────────────────────────

    /// Adopt `index` as current, finalizing the previous slot if it is text.
    async fn change_index(&mut self, index: usize) -> Result<(), DispatchError> {
        if self.current == Some(index) {
            return Ok(());
        }
        if let Some(previous) = self.current {
            self.finalize_text(previous).await?;
        }
        self.current = Some(index);
        Ok(())
    }

    /// Send and remove the slot at `index` if it is a text slot.
    async fn finalize_text(&mut self, index: usize) -> Result<(), DispatchError> {
        if let Some(Slot::Text { render, text }) = self.slots.get(&index) {
            tracing::debug!(index, chars = text.len(), "finalizing text slot");
            let render = render.clone();
            self.slots.remove(&index);
            self.surface.send_message(&render).await?;
        }
        Ok(())
    }

    /// Drop a slot of the wrong kind without rendering it further.
    fn discard_slot(&mut self, index: usize) {
        if let Some(old) = self.slots.remove(&index) {
            tracing::debug!(index, render = %old.render(), "slot kind changed, discarding render object");
        }
    }

    fn remembered_name(&self, index: usize) -> Option<String> {
        match self.slots.get(&index) {
            Some(Slot::Tool { name, .. }) => Some(name.clone()),
            _ => self.pending_names.get(&index).cloned(),
        }
    }

    fn remember_name(&mut self, index: usize, learned: &str) {
        match self.slots.get_mut(&index) {
            Some(Slot::Tool { name, .. }) => {
                if name != learned {
                    tracing::debug!(index, old = %name, new = learned, "tool name changed for open slot");
                    *name = learned.to_string();
                }
            }
            _ => {
                self.pending_names.insert(index, learned.to_string());
            }
        }
    }

    fn next_render_id(&mut self) -> RenderId {
        self.next_render += 1;
        RenderId(format!("{}-{}", self.render_prefix, self.next_render))
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::surface::{ChannelSurface, UiEvent};
    use serde_json::json;
    use tokio::sync::mpsc;

    fn dispatcher() -> (StreamDispatcher<ChannelSurface>, mpsc::Receiver<UiEvent>) {
        let (surface, rx) = ChannelSurface::channel(256);
        (StreamDispatcher::new(surface, Span::none()), rx)
    }

    fn drain(rx: &mut mpsc::Receiver<UiEvent>) -> Vec<UiEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn text(index: usize, t: &str) -> StreamEvent {
        StreamEvent::Text {
            index,
            text: t.into(),
        }
    }

    fn tool(index: usize, name: Option<&str>, input: Option<&str>) -> StreamEvent {
        StreamEvent::ToolUse {
            index,
            id: None,
            name: name.map(String::from),
            input: input.map(String::from),
        }
    }

    fn output(content: &str, tool_name: Option<&str>) -> StreamEvent {
        StreamEvent::ToolOutput {
            content: content.into(),
            tool_name: tool_name.map(String::from),
        }
    }

    fn sends(events: &[UiEvent]) -> usize {
        events
            .iter()
            .filter(|e| matches!(e, UiEvent::MessageSend { .. } | UiEvent::StepSend { .. }))
            .count()
    }

    #[tokio::test]
    async fn test_text_chunks_then_end_turn_finalize_once() {
        let (mut d, mut rx) = dispatcher();
        d.dispatch(text(0, "He")).await.unwrap();
        d.dispatch(text(0, "llo")).await.unwrap();
        d.dispatch(StreamEvent::EndTurn).await.unwrap();

        let events = drain(&mut rx);
        let id = events[0].id().clone();
        assert_eq!(
            events,
            vec![
                UiEvent::MessageOpen {
                    id: id.clone(),
                    kind: MessageKind::Assistant,
                    content: String::new()
                },
                UiEvent::MessageToken {
                    id: id.clone(),
                    token: "He".into()
                },
                UiEvent::MessageToken {
                    id: id.clone(),
                    token: "llo".into()
                },
                UiEvent::MessageSend { id },
            ]
        );
        assert_eq!(d.active_slots(), 0);

        // A duplicate end signal finds nothing left to finalize.
        d.dispatch(StreamEvent::EndTurn).await.unwrap();
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_tool_slot_accumulates_input_then_output() {
        let (mut d, mut rx) = dispatcher();
        d.dispatch(tool(1, Some("add"), Some("{a:1"))).await.unwrap();
        d.dispatch(tool(1, None, Some(",b:2}"))).await.unwrap();

        match d.slot(1) {
            Some(Slot::Tool {
                name, input, phase, ..
            }) => {
                assert_eq!(name, "add");
                assert_eq!(input, "{a:1,b:2}");
                assert_eq!(*phase, ToolPhase::Input);
            }
            other => panic!("expected tool slot, got {other:?}"),
        }

        d.dispatch(output("3", Some("add"))).await.unwrap();

        let events = drain(&mut rx);
        let id = events[0].id().clone();
        assert_eq!(
            events,
            vec![
                UiEvent::StepOpen {
                    id: id.clone(),
                    name: "MCP Tool: add".into()
                },
                UiEvent::StepToken {
                    id: id.clone(),
                    token: "{a:1".into(),
                    is_input: true
                },
                UiEvent::StepToken {
                    id: id.clone(),
                    token: ",b:2}".into(),
                    is_input: true
                },
                UiEvent::StepToken {
                    id: id.clone(),
                    token: "3".into(),
                    is_input: false
                },
                UiEvent::StepSend { id },
            ]
        );
        assert!(d.slot(1).is_none(), "tool slot is removed once finalized");
    }

    #[tokio::test]
    async fn test_index_switch_finalizes_text_once_and_removes_it() {
        let (mut d, mut rx) = dispatcher();
        d.dispatch(text(0, "Let me add.")).await.unwrap();
        d.dispatch(tool(1, Some("add"), Some("{}"))).await.unwrap();

        let events = drain(&mut rx);
        let text_id = events[0].id().clone();
        assert!(events.contains(&UiEvent::MessageSend {
            id: text_id.clone()
        }));
        assert_eq!(sends(&events), 1);
        assert!(d.slot(0).is_none());
        assert_eq!(d.current_index(), Some(1));

        // Switching back to 0 does not finalize the tool slot, and index 0
        // starts a fresh message.
        d.dispatch(text(0, "Done")).await.unwrap();
        let events = drain(&mut rx);
        assert_eq!(sends(&events), 0);
        match &events[0] {
            UiEvent::MessageOpen { id, .. } => assert_ne!(id, &text_id),
            other => panic!("expected a new message, got {other:?}"),
        }
        assert!(matches!(d.slot(1), Some(Slot::Tool { .. })));
    }

    #[tokio::test]
    async fn test_nameless_tool_chunk_without_memory_is_skipped() {
        let (mut d, mut rx) = dispatcher();
        d.dispatch(text(0, "Hi")).await.unwrap();
        drain(&mut rx);

        d.dispatch(tool(3, None, Some("{\"a\":"))).await.unwrap();

        assert!(drain(&mut rx).is_empty());
        assert_eq!(d.current_index(), Some(0));
        assert!(d.slot(3).is_none());
        assert!(matches!(d.slot(0), Some(Slot::Text { .. })));
    }

    #[tokio::test]
    async fn test_name_remembered_before_slot_exists() {
        let (mut d, mut rx) = dispatcher();
        d.dispatch(tool(1, Some("divide"), None)).await.unwrap();
        assert!(d.slot(1).is_none());

        d.dispatch(tool(1, None, Some("{\"a\":1,\"b\":0}"))).await.unwrap();
        let events = drain(&mut rx);
        assert_eq!(
            events[0],
            UiEvent::StepOpen {
                id: events[0].id().clone(),
                name: "MCP Tool: divide".into()
            }
        );
    }

    #[tokio::test]
    async fn test_reasoning_flushes_once_per_signature() {
        let (mut d, mut rx) = dispatcher();
        for chunk in ["Let ", "me ", "think"] {
            d.dispatch(StreamEvent::Reasoning(ReasoningChunk::Text(chunk.into())))
                .await
                .unwrap();
        }
        d.dispatch(StreamEvent::Reasoning(ReasoningChunk::Signature("sig".into())))
            .await
            .unwrap();
        // A second signature has nothing pending.
        d.dispatch(StreamEvent::Reasoning(ReasoningChunk::Signature("sig".into())))
            .await
            .unwrap();

        let events = drain(&mut rx);
        assert_eq!(events.len(), 5);
        match &events[0] {
            UiEvent::MessageOpen { kind, content, .. } => {
                assert_eq!(*kind, MessageKind::Thinking);
                assert_eq!(content, THINKING_PLACEHOLDER);
            }
            other => panic!("expected thinking message, got {other:?}"),
        }
        assert_eq!(sends(&events), 1);
        assert!(matches!(events[4], UiEvent::MessageSend { .. }));
    }

    #[tokio::test]
    async fn test_reasoning_after_flush_opens_new_message() {
        let (mut d, mut rx) = dispatcher();
        d.dispatch(StreamEvent::Reasoning(ReasoningChunk::Text("a".into())))
            .await
            .unwrap();
        d.dispatch(StreamEvent::Reasoning(ReasoningChunk::Signature("s".into())))
            .await
            .unwrap();
        d.dispatch(StreamEvent::Reasoning(ReasoningChunk::Text("b".into())))
            .await
            .unwrap();

        let opens: Vec<RenderId> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                UiEvent::MessageOpen { id, .. } => Some(id),
                _ => None,
            })
            .collect();
        assert_eq!(opens.len(), 2);
        assert_ne!(opens[0], opens[1]);
    }

    #[tokio::test]
    async fn test_tool_output_matches_slot_by_name() {
        let (mut d, mut rx) = dispatcher();
        d.dispatch(tool(1, Some("add"), Some("{}"))).await.unwrap();
        d.dispatch(tool(2, Some("multiply"), Some("{}"))).await.unwrap();
        drain(&mut rx);

        d.dispatch(output("6", Some("add"))).await.unwrap();
        assert!(d.slot(1).is_none());
        assert!(d.slot(2).is_some());
        assert_eq!(d.current_index(), Some(1));

        d.dispatch(output("8", Some("multiply"))).await.unwrap();
        assert_eq!(d.active_slots(), 0);
        assert_eq!(sends(&drain(&mut rx)), 2);
    }

    #[tokio::test]
    async fn test_tool_output_falls_back_to_current_index() {
        let (mut d, mut rx) = dispatcher();
        d.dispatch(tool(1, Some("add"), Some("{}"))).await.unwrap();
        drain(&mut rx);

        d.dispatch(output("3", None)).await.unwrap();
        let events = drain(&mut rx);
        assert_eq!(sends(&events), 1);
        assert!(d.slot(1).is_none());
    }

    #[tokio::test]
    async fn test_tool_output_without_tool_slot_is_dropped() {
        let (mut d, mut rx) = dispatcher();
        d.dispatch(text(0, "Hi")).await.unwrap();
        drain(&mut rx);

        d.dispatch(output("3", Some("add"))).await.unwrap();
        assert!(drain(&mut rx).is_empty());
        assert!(matches!(d.slot(0), Some(Slot::Text { .. })));
    }

    #[tokio::test]
    async fn test_kind_change_at_same_index_discards_old_object() {
        let (mut d, mut rx) = dispatcher();
        d.dispatch(text(0, "partial")).await.unwrap();
        d.dispatch(tool(0, Some("add"), Some("{}"))).await.unwrap();

        let events = drain(&mut rx);
        // The text message is replaced, not sent.
        assert_eq!(sends(&events), 0);
        assert!(matches!(d.slot(0), Some(Slot::Tool { .. })));
    }

    #[tokio::test]
    async fn test_end_turn_ignores_tool_slot() {
        let (mut d, mut rx) = dispatcher();
        d.dispatch(tool(1, Some("add"), Some("{}"))).await.unwrap();
        d.dispatch(StreamEvent::EndTurn).await.unwrap();

        assert_eq!(sends(&drain(&mut rx)), 0);
        assert!(d.slot(1).is_some());
    }

    #[tokio::test]
    async fn test_malformed_item_is_skipped() {
        let (mut d, mut rx) = dispatcher();
        d.dispatch_item(&json!({"type": "text", "index": 0}))
            .await
            .unwrap();
        d.dispatch_item(&json!({"type": "text", "text": "ok", "index": 0}))
            .await
            .unwrap();

        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[1], UiEvent::MessageToken { token, .. } if token == "ok"));
    }

    #[tokio::test]
    async fn test_run_consumes_stream() {
        let (mut d, mut rx) = dispatcher();
        let events = futures::stream::iter(vec![
            text(0, "The answer is "),
            tool(1, Some("add"), Some("{\"a\":1,\"b\":2}")),
            output("3", Some("add")),
            text(2, "3."),
            StreamEvent::EndTurn,
        ]);
        d.run(events).await.unwrap();

        let events = drain(&mut rx);
        assert_eq!(sends(&events), 3);
        assert_eq!(d.active_slots(), 0);
    }

    #[tokio::test]
    async fn test_closed_surface_stops_dispatch() {
        let (mut d, rx) = dispatcher();
        drop(rx);
        let err = d.dispatch(text(0, "lost")).await.unwrap_err();
        assert_eq!(err, DispatchError::Closed);
    }
}
