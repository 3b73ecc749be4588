//! Per-call orchestration.
//!
//! One orchestrator per accepted carrier connection. It drives the call
//! state machine (Pending → Ringing → InProgress → terminal), wires the
//! carrier and model legs together through the codec, enforces turn-taking
//! (barge-in, mark-gated delivery), answers tool calls, and emits lifecycle
//! events to the recorder. Every component surfaces its errors here and
//! nowhere else; the orchestrator alone decides terminal transitions.

use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use tokio::time::{interval, timeout, Instant};
use tokio_util::sync::CancellationToken;

use super::control::ControlChannel;
use super::record::{Call, CallEvent, CallStatus, Speaker, ToolCallRecord};
use super::registry::CallRegistry;
use crate::audio::CallCodec;
use crate::carrier::{CarrierEvent, CarrierTransport};
use crate::model::{
    CloseReason, FunctionCall, ModelConnector, ModelEvent, ModelTransport, ToolScheduling,
};
use crate::protocol_constants::MARK_PREFIX;
use crate::recorder::CallRecorder;
use crate::routing::{RejectReason, Resolution, RoutingTable};
use crate::state::{CallLimits, GatewayStats};

/// Handles tool calls reflected from the model.
///
/// The registry of real handlers lives outside the core; the orchestrator's
/// contract is only that every tool call gets exactly one response within a
/// bounded time, defaulting to the stub.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn handle(&self, call: &FunctionCall) -> Value;
}

/// Default handler: acknowledges every tool call.
pub struct StubToolHandler;

#[async_trait]
impl ToolHandler for StubToolHandler {
    async fn handle(&self, _call: &FunctionCall) -> Value {
        json!({ "result": "ok" })
    }
}

/// Shared services injected into every orchestrator.
#[derive(Clone)]
pub struct OrchestratorDeps {
    pub routing: Arc<RoutingTable>,
    pub recorder: Arc<CallRecorder>,
    pub connector: Arc<dyn ModelConnector>,
    pub control: ControlChannel,
    pub tools: Arc<dyn ToolHandler>,
    pub registry: Arc<CallRegistry>,
    pub limits: CallLimits,
    pub stats: Arc<GatewayStats>,
}

/// How the steady-state loop ended.
enum LoopOutcome {
    /// Clean end of call.
    Completed(&'static str),
    /// Fatal error; the reason is persisted.
    Failed(String),
    /// Caller went away before the agent ever spoke.
    Abandoned(&'static str),
}

/// Runs one call to completion and returns the terminal record.
///
/// The carrier transport is whatever accepted connection the listener hands
/// over; the model leg is opened here once routing has chosen an agent.
pub async fn run_call<C: CarrierTransport>(
    mut carrier: C,
    deps: OrchestratorDeps,
    cancel: CancellationToken,
) -> Call {
    let mut call = Call::new(crate::call::CallDirection::Inbound);
    let _registration = deps.registry.register(call.id, cancel.clone());
    deps.recorder.begin(call.id);

    let setup_deadline = Instant::now() + deps.limits.setup_timeout();
    let persist = run_phases(&mut carrier, &deps, &mut call, setup_deadline, cancel).await;

    if call.status == CallStatus::Completed {
        drain_outbound(&carrier).await;
    }
    carrier.close(call.outcome.as_deref().unwrap_or("ended")).await;

    if persist {
        deps.recorder.append_event(
            call.id,
            CallEvent::StatusChanged {
                status: call.status,
            },
        );
        deps.recorder.finalize(&call);
    }

    deps.stats.calls_handled.fetch_add(1, Ordering::Relaxed);
    log::info!(
        "[Call] {} finished: status={}, outcome={:?}, duration={:?}s",
        call.id,
        call.status.as_str(),
        call.outcome,
        call.duration_secs()
    );
    call
}

/// Lets the paced writer finish queued audio before a completed call's
/// carrier leg closes.
async fn drain_outbound<C: CarrierTransport>(carrier: &C) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while carrier.outbound_depth() > 0 && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Drives setup, routing, model open, and the steady state; mutates the call
/// record into its terminal state. Returns whether the call should be
/// persisted (capacity refusals leave only a counter behind).
async fn run_phases<C: CarrierTransport>(
    carrier: &mut C,
    deps: &OrchestratorDeps,
    call: &mut Call,
    setup_deadline: Instant,
    cancel: CancellationToken,
) -> bool {
    // Phase 1: carrier connect + start
    let info = match setup_phase(carrier, call, setup_deadline, &cancel).await {
        Ok(info) => info,
        Err(outcome) => {
            apply_outcome(call, outcome);
            return true;
        }
    };

    call.direction = info.direction;
    call.from = info.from.clone();
    call.to = info.to.clone();
    call.stream_id = Some(info.stream_id.clone());
    call.carrier_call_id = Some(info.call_id.clone());
    deps.registry.record_start(call.id, &info);

    // Phase 2: routing
    let (agent, _permit) = match deps
        .routing
        .resolve(info.direction, &info.to, &info.from, Utc::now())
    {
        Resolution::Agent(agent, permit) => (agent, permit),
        Resolution::Forward(number) => {
            log::info!("[Call] {} forwarded to {}", call.id, number);
            record_created(deps, call);
            apply_outcome(call, LoopOutcome::Completed("forwarded"));
            call.outcome = Some(format!("forwarded:{number}"));
            return true;
        }
        Resolution::Rejected(reason) => {
            return match reason {
                RejectReason::Overloaded => {
                    // Refused before media: a counter increment, not a record
                    deps.stats.refused_overload.fetch_add(1, Ordering::Relaxed);
                    log::warn!("[Call] {} refused: agent at capacity", call.id);
                    call.outcome = Some(RejectReason::Overloaded.as_str().to_string());
                    let _ = call.transition(CallStatus::Failed);
                    false
                }
                RejectReason::DncBlock => {
                    deps.stats.refused_dnc.fetch_add(1, Ordering::Relaxed);
                    record_created(deps, call);
                    apply_outcome(call, LoopOutcome::Failed(reason.as_str().to_string()));
                    true
                }
                RejectReason::NoAgentAvailable => {
                    record_created(deps, call);
                    apply_outcome(call, LoopOutcome::Failed(reason.as_str().to_string()));
                    true
                }
            };
        }
    };

    call.agent_id = Some(agent.id.clone());
    deps.registry.record_agent(call.id, &agent.id);
    record_created(deps, call);
    deps.recorder.append_event(
        call.id,
        CallEvent::AgentResolved {
            agent_id: agent.id.clone(),
        },
    );

    // Phase 3: model session, inside the same setup window
    let open = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            apply_outcome(call, LoopOutcome::Failed("shutdown".to_string()));
            return true;
        }
        open = tokio::time::timeout_at(
            setup_deadline,
            deps.connector.open(agent.session.clone(), None),
        ) => open,
    };
    let mut model = match open {
        Ok(Ok(model)) => model,
        Ok(Err(e)) => {
            log::warn!("[Call] {} model open failed: {}", call.id, e);
            apply_outcome(call, LoopOutcome::Failed(e.code().to_string()));
            return true;
        }
        Err(_) => {
            apply_outcome(call, LoopOutcome::Failed("setup_timeout".to_string()));
            return true;
        }
    };

    if call.transition(CallStatus::InProgress).is_err() {
        // Carrier vanished between start and model ack
        apply_outcome(call, LoopOutcome::Failed("setup_timeout".to_string()));
        model.close().await;
        return true;
    }
    deps.recorder.append_event(
        call.id,
        CallEvent::StatusChanged {
            status: CallStatus::InProgress,
        },
    );

    // Phase 4: steady state
    let outcome = steady_state(carrier, model.as_mut(), deps, call, cancel).await;

    let dropped_to_model = model.dropped_audio();
    let dropped_to_carrier = carrier.dropped_outbound();
    let inbound_gaps = carrier.dropped_inbound();
    if dropped_to_model > 0 || dropped_to_carrier > 0 || inbound_gaps > 0 {
        log::warn!(
            "[Call] {} frame drops: to_model={}, to_carrier={}, inbound_gaps={}",
            call.id,
            dropped_to_model,
            dropped_to_carrier,
            inbound_gaps
        );
    }

    model.close().await;
    apply_outcome(call, outcome);
    true
}

fn record_created(deps: &OrchestratorDeps, call: &Call) {
    deps.recorder.append_event(
        call.id,
        CallEvent::Created {
            direction: call.direction,
            from: call.from.clone(),
            to: call.to.clone(),
        },
    );
}

/// Applies a loop outcome to the call record, tolerating the few races where
/// the call never left an early state.
fn apply_outcome(call: &mut Call, outcome: LoopOutcome) {
    let (status, outcome_str) = match outcome {
        LoopOutcome::Completed(tag) => (CallStatus::Completed, tag.to_string()),
        LoopOutcome::Failed(reason) => (CallStatus::Failed, reason),
        LoopOutcome::Abandoned(tag) => (CallStatus::Abandoned, tag.to_string()),
    };
    call.outcome = Some(outcome_str);
    if call.transition(status).is_err() {
        // Pending/Ringing can't reach Completed/Abandoned directly; those
        // early exits are failures by definition.
        let _ = call.transition(CallStatus::Failed);
    }
}

/// Phase 1: wait for the carrier's connected and start frames.
async fn setup_phase<C: CarrierTransport>(
    carrier: &mut C,
    call: &mut Call,
    deadline: Instant,
    cancel: &CancellationToken,
) -> Result<crate::carrier::StartInfo, LoopOutcome> {
    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(LoopOutcome::Failed("shutdown".to_string()));
            }
            received = tokio::time::timeout_at(deadline, carrier.receive()) => match received {
                Ok(event) => event,
                Err(_) => return Err(LoopOutcome::Failed("setup_timeout".to_string())),
            },
        };
        match event {
            Some(CarrierEvent::Connected) => {
                let _ = call.transition(CallStatus::Ringing);
            }
            Some(CarrierEvent::Start(info)) => {
                // Some carriers skip the connected frame; ringing either way
                if call.status == CallStatus::Pending {
                    let _ = call.transition(CallStatus::Ringing);
                }
                return Ok(info);
            }
            Some(CarrierEvent::Stop { .. }) | Some(CarrierEvent::Closed) | None => {
                return Err(LoopOutcome::Failed("carrier_closed".to_string()));
            }
            Some(CarrierEvent::ProtocolError(msg)) => {
                log::warn!("[Call] {} protocol error during setup: {}", call.id, msg);
                return Err(LoopOutcome::Failed("protocol".to_string()));
            }
            Some(_) => {} // media before start is not meaningful
        }
    }
}

/// Phase 4: the bidirectional bridge.
async fn steady_state<C: CarrierTransport>(
    carrier: &mut C,
    model: &mut dyn ModelTransport,
    deps: &OrchestratorDeps,
    call: &mut Call,
    cancel: CancellationToken,
) -> LoopOutcome {
    let mut codec = CallCodec::new();
    let mut control_rx = deps.control.subscribe();

    // Idle detection runs on VAD-adjacent signals (transcriptions, agent
    // audio), not raw media frames: carriers stream silence continuously.
    let mut idle_check = interval(Duration::from_secs(1));
    let mut last_activity = Instant::now();
    let mut idle_prompted = false;

    let mut agent_audio_sent = false;
    let mut mark_counter: u64 = 0;
    let mut pending_marks: HashSet<String> = HashSet::new();

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                return LoopOutcome::Failed("shutdown".to_string());
            }

            cmd = control_rx.recv() => {
                if let Ok(cmd) = cmd {
                    if cmd.addresses(call.id, call.agent_id.as_deref()) {
                        return LoopOutcome::Failed("emergency_stop".to_string());
                    }
                }
            }

            event = carrier.receive() => {
                match event {
                    Some(CarrierEvent::Media(frame)) => {
                        let pcm = codec.decode_ulaw_to_pcm16k(&frame.data);
                        // Backpressure and drops are the session's concern;
                        // counters surface them without failing the call.
                        let _ = model.send_audio(pcm);
                    }
                    Some(CarrierEvent::MarkEchoed { name }) => {
                        if pending_marks.remove(&name) {
                            // The carrier finished playing the turn; it is
                            // now delivered and chargeable.
                            deps.recorder.append_event(
                                call.id,
                                CallEvent::TurnDelivered { mark: name },
                            );
                        }
                    }
                    Some(CarrierEvent::Dtmf { digit }) => {
                        deps.recorder.append_event(call.id, CallEvent::Dtmf { digit });
                    }
                    Some(CarrierEvent::Stop { .. }) | Some(CarrierEvent::Closed) | None => {
                        // Hangup mid-utterance still counts as a completed
                        // conversation; abandoned means the agent never spoke.
                        return if agent_audio_sent {
                            LoopOutcome::Completed("completed")
                        } else {
                            LoopOutcome::Abandoned("abandoned")
                        };
                    }
                    Some(CarrierEvent::ProtocolError(msg)) => {
                        log::warn!("[Call] {} carrier protocol error: {}", call.id, msg);
                        return LoopOutcome::Failed("protocol".to_string());
                    }
                    Some(CarrierEvent::Connected) | Some(CarrierEvent::Start(_)) => {}
                }
            }

            event = model.receive() => {
                match event {
                    Some(ModelEvent::AudioOut(pcm)) => {
                        last_activity = Instant::now();
                        match codec.encode_pcm24k_to_ulaw(&pcm) {
                            Ok(ulaw) => {
                                if !ulaw.is_empty() {
                                    carrier.send_media(ulaw);
                                    agent_audio_sent = true;
                                }
                            }
                            Err(e) => {
                                log::warn!("[Call] {} corrupt model audio: {}", call.id, e);
                                return LoopOutcome::Failed("protocol".to_string());
                            }
                        }
                    }
                    Some(ModelEvent::Interrupted) => {
                        // Barge-in: the model already dropped its buffered
                        // audio; flush ours and the carrier's.
                        carrier.send_clear();
                        log::debug!("[Call] {} barge-in, cleared outbound audio", call.id);
                    }
                    Some(ModelEvent::InputTranscription(text)) => {
                        last_activity = Instant::now();
                        idle_prompted = false;
                        let fragment = call.push_transcript(Speaker::Caller, text);
                        deps.recorder
                            .append_event(call.id, CallEvent::Transcript(fragment));
                    }
                    Some(ModelEvent::OutputTranscription(text)) => {
                        let fragment = call.push_transcript(Speaker::Agent, text);
                        deps.recorder
                            .append_event(call.id, CallEvent::Transcript(fragment));
                    }
                    Some(ModelEvent::TurnComplete) => {
                        mark_counter += 1;
                        let name = format!("{MARK_PREFIX}{mark_counter}");
                        pending_marks.insert(name.clone());
                        carrier.send_mark(&name);
                    }
                    Some(ModelEvent::GenerationComplete) => {}
                    Some(ModelEvent::ToolCall(function_call)) => {
                        respond_to_tool(model, deps, call, function_call).await;
                    }
                    Some(ModelEvent::ResumptionUpdate { .. }) => {}
                    Some(ModelEvent::GoAway { time_left }) => {
                        log::info!(
                            "[Call] {} model session ending in {:?}, handover pending",
                            call.id,
                            time_left
                        );
                    }
                    Some(ModelEvent::Reconnected { blackout }) => {
                        call.resumption_handle_count += 1;
                        deps.recorder.append_event(
                            call.id,
                            CallEvent::Handover {
                                blackout_ms: blackout.as_millis() as u64,
                            },
                        );
                        if blackout > deps.limits.handover_budget() {
                            log::warn!(
                                "[Call] {} handover blackout {:?} exceeded budget",
                                call.id,
                                blackout
                            );
                            return LoopOutcome::Failed("session_handover_failed".to_string());
                        }
                    }
                    Some(ModelEvent::Closed(CloseReason::Normal)) => {
                        return LoopOutcome::Completed("completed");
                    }
                    Some(ModelEvent::Closed(CloseReason::TransportLost(reason))) => {
                        log::warn!("[Call] {} model transport lost: {}", call.id, reason);
                        return LoopOutcome::Failed("transport".to_string());
                    }
                    Some(ModelEvent::Error(e)) => {
                        log::warn!("[Call] {} model error: {}", call.id, e);
                        return LoopOutcome::Failed(e.code().to_string());
                    }
                    None => {
                        return LoopOutcome::Failed("transport".to_string());
                    }
                }
            }

            _ = idle_check.tick() => {
                if last_activity.elapsed() >= deps.limits.idle_timeout() {
                    if idle_prompted {
                        log::info!("[Call] {} idle after prompt, abandoning", call.id);
                        return LoopOutcome::Abandoned("abandoned");
                    }
                    idle_prompted = true;
                    last_activity = Instant::now();
                    model.send_text(
                        "The caller has been silent for a while. Briefly ask if they are still there.",
                    );
                }
            }
        }
    }
}

/// Answers one tool call: the configured handler inside its time budget,
/// the stub otherwise. Exactly one response per call id, always.
async fn respond_to_tool(
    model: &mut dyn ModelTransport,
    deps: &OrchestratorDeps,
    call: &Call,
    function_call: FunctionCall,
) {
    let response = match timeout(
        deps.limits.tool_timeout(),
        deps.tools.handle(&function_call),
    )
    .await
    {
        Ok(value) => value,
        Err(_) => {
            log::warn!(
                "[Call] {} tool handler timed out for {}, sending stub",
                call.id,
                function_call.name
            );
            json!({ "result": "ok" })
        }
    };

    model.send_tool_response(
        &function_call.id,
        &function_call.name,
        &response,
        ToolScheduling::WhenIdle,
    );
    deps.recorder.append_event(
        call.id,
        CallEvent::ToolCall(ToolCallRecord {
            id: function_call.id,
            name: function_call.name,
            arguments: function_call.args,
            response,
            scheduling: ToolScheduling::WhenIdle,
        }),
    );
}
