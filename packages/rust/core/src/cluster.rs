//! Ticket clustering.
//!
//! The clustering model itself lives outside this crate. [`BridgeClusterer`]
//! drives it as a subprocess speaking JSON lines on stdin/stdout:
//!
//! ```text
//! <- {"type":"ready"}
//! -> {"type":"cluster","id":"req-1","texts":[{"title":"…","description":"…"}]}
//! <- {"type":"result","id":"req-1","labels":[0,0,-1]}
//! <- {"type":"error","id":"req-1","error":"…"}
//! -> {"type":"shutdown"}
//! ```
//!
//! [`cluster_groups`] applies the grouping rules on top of any
//! [`Clusterer`]: small groups are never sent, and a failing group falls
//! back to unclustered without affecting the others.

use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use kbmirror_shared::{ArticleId, ClusterAssignment, ClusterLabel, KbMirrorError, Result, TicketRow};

/// Assigns one label per `(title, description)` pair.
pub trait Clusterer: Send {
    fn cluster(&mut self, texts: &[(String, String)]) -> Result<Vec<ClusterLabel>>;
}

/// Labels everything as noise. Used when no bridge is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unclustered;

impl Clusterer for Unclustered {
    fn cluster(&mut self, texts: &[(String, String)]) -> Result<Vec<ClusterLabel>> {
        Ok(vec![ClusterLabel::NOISE; texts.len()])
    }
}

// ---------------------------------------------------------------------------
// Bridge protocol
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct TicketText<'a> {
    title: &'a str,
    description: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RequestMessage<'a> {
    Cluster { id: String, texts: Vec<TicketText<'a>> },
    Shutdown,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseMessage {
    Ready,
    Result { id: String, labels: Vec<i32> },
    Error {
        #[allow(dead_code)]
        id: String,
        error: String,
    },
}

// ---------------------------------------------------------------------------
// BridgeClusterer
// ---------------------------------------------------------------------------

/// Handle to a spawned clustering subprocess.
pub struct BridgeClusterer {
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    request_counter: u64,
}

impl BridgeClusterer {
    /// Spawn `cmd args…` and wait for its ready message.
    pub fn spawn(cmd: &str, args: &[String]) -> Result<Self> {
        info!(cmd, ?args, "spawning clustering bridge");

        let mut child = Command::new(cmd)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| KbMirrorError::Cluster(format!("failed to spawn bridge `{cmd}`: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| KbMirrorError::Cluster("failed to capture bridge stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| KbMirrorError::Cluster("failed to capture bridge stdout".into()))?;

        let mut bridge = Self {
            child,
            stdin,
            reader: BufReader::new(stdout),
            request_counter: 0,
        };
        bridge.wait_for_ready()?;
        Ok(bridge)
    }

    fn read_message(&mut self) -> Result<ResponseMessage> {
        let mut line = String::new();
        self.reader
            .read_line(&mut line)
            .map_err(|e| KbMirrorError::Cluster(format!("bridge read error: {e}")))?;

        if line.is_empty() {
            return Err(KbMirrorError::Cluster("bridge closed stdout unexpectedly".into()));
        }

        serde_json::from_str(line.trim()).map_err(|e| {
            KbMirrorError::Cluster(format!(
                "invalid bridge message: {e} (got: {})",
                line.trim().chars().take(200).collect::<String>()
            ))
        })
    }

    fn wait_for_ready(&mut self) -> Result<()> {
        match self.read_message()? {
            ResponseMessage::Ready => {
                info!("clustering bridge is ready");
                Ok(())
            }
            other => Err(KbMirrorError::Cluster(format!(
                "expected ready message, got {other:?}"
            ))),
        }
    }

    fn send(&mut self, request: &RequestMessage<'_>) -> Result<()> {
        let json = serde_json::to_string(request)
            .map_err(|e| KbMirrorError::Cluster(format!("failed to serialize request: {e}")))?;
        writeln!(self.stdin, "{json}")
            .and_then(|()| self.stdin.flush())
            .map_err(|e| KbMirrorError::Cluster(format!("failed to write to bridge: {e}")))
    }

    /// Send shutdown and wait for the bridge to exit.
    pub fn shutdown(mut self) {
        if let Err(e) = self.send(&RequestMessage::Shutdown) {
            debug!(error = %e, "failed to send shutdown to clustering bridge");
        }
        match self.child.wait() {
            Ok(status) => info!(?status, "clustering bridge exited"),
            Err(e) => warn!(error = %e, "clustering bridge wait error"),
        }
    }
}

impl Clusterer for BridgeClusterer {
    fn cluster(&mut self, texts: &[(String, String)]) -> Result<Vec<ClusterLabel>> {
        self.request_counter += 1;
        let id = format!("req-{}", self.request_counter);

        let request = RequestMessage::Cluster {
            id: id.clone(),
            texts: texts
                .iter()
                .map(|(title, description)| TicketText { title, description })
                .collect(),
        };
        self.send(&request)?;

        match self.read_message()? {
            ResponseMessage::Result { id: resp_id, labels } => {
                if resp_id != id {
                    return Err(KbMirrorError::Cluster(format!(
                        "bridge answered {resp_id}, expected {id}"
                    )));
                }
                Ok(labels.into_iter().map(ClusterLabel).collect())
            }
            ResponseMessage::Error { error, .. } => Err(KbMirrorError::Cluster(error)),
            ResponseMessage::Ready => Err(KbMirrorError::Cluster(
                "unexpected ready message during clustering".into(),
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Grouping rules
// ---------------------------------------------------------------------------

/// Cluster each article's tickets. Groups of at most `min_group_size`
/// tickets are never sent to the clusterer. A group the clusterer fails on
/// comes back as noise.
#[instrument(skip_all, fields(groups = groups.len(), min_group_size = min_group_size))]
pub fn cluster_groups(
    groups: BTreeMap<ArticleId, Vec<TicketRow>>,
    min_group_size: usize,
    clusterer: &mut dyn Clusterer,
) -> BTreeMap<ArticleId, Vec<ClusterAssignment>> {
    groups
        .into_iter()
        .map(|(article_id, tickets)| {
            let labels = if tickets.len() <= min_group_size {
                debug!(article_id = %article_id, size = tickets.len(), "group too small to cluster");
                None
            } else {
                label_group(&article_id, &tickets, clusterer)
            };

            let assignments = match labels {
                Some(labels) => tickets
                    .into_iter()
                    .zip(labels)
                    .map(|(ticket, label)| ClusterAssignment { ticket, label })
                    .collect(),
                None => tickets
                    .into_iter()
                    .map(|ticket| ClusterAssignment {
                        ticket,
                        label: ClusterLabel::NOISE,
                    })
                    .collect(),
            };
            (article_id, assignments)
        })
        .collect()
}

fn label_group(
    article_id: &ArticleId,
    tickets: &[TicketRow],
    clusterer: &mut dyn Clusterer,
) -> Option<Vec<ClusterLabel>> {
    let texts: Vec<(String, String)> = tickets
        .iter()
        .map(|t| (t.title.clone(), t.description.clone().unwrap_or_default()))
        .collect();

    match clusterer.cluster(&texts) {
        Ok(labels) if labels.len() == tickets.len() => Some(labels),
        Ok(labels) => {
            warn!(
                article_id = %article_id,
                expected = tickets.len(),
                got = labels.len(),
                "clusterer returned the wrong number of labels"
            );
            None
        }
        Err(e) => {
            warn!(article_id = %article_id, error = %e, "clustering failed for group");
            None
        }
    }
}
