use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use converge_api::kinds::{
    AttachmentSpec, Cluster, ClusterAttachment, ClusterEndpoint, ClusterEndpointVip, ClusterSpec, EndpointAccess, EndpointSpec,
    EndpointVipSpec, NodePool, NodePoolSpec,
};
use converge_api::{CancelToken, Grant, Orchestrator, PermissionSet, ResourceIdentity, ResourceKind, Timeouts};
use converge_persist::{Ledger, LedgerEntry, SqliteLedger};
use converge_remote::{RemoteClient, SimCloud};
use metrics::histogram;
use serde::Serialize;
use serde_json::json;
use tokio::signal;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "convergectl", version, about = "Drive managed-Kubernetes resources to their declared state")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Ledger database (default: ~/.converge/converge.db)
    #[arg(long = "db", global = true, env = "CONVERGE_DB_PATH")]
    db: Option<String>,

    /// Describes a simulated resource needs before it settles
    #[arg(long = "sim-steps", global = true, env = "CONVERGE_SIM_STEPS", default_value_t = 2)]
    sim_steps: u32,

    /// Sleep between status polls, overriding CONVERGE_POLL_INTERVAL_MS
    #[arg(long = "poll-interval-ms", global = true)]
    poll_interval_ms: Option<u64>,

    /// Budget for describes and waits, overriding CONVERGE_READ_TIMEOUT_SECS
    #[arg(long = "read-timeout-secs", global = true)]
    read_timeout_secs: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Managed clusters
    Cluster {
        #[command(subcommand)]
        op: ClusterOp,
    },
    /// Worker node pools (`clusterId#nodePoolId`)
    Nodepool {
        #[command(subcommand)]
        op: NodePoolOp,
    },
    /// API server endpoints (`clusterId#internet|intranet`, or `clusterId` for the vip)
    Endpoint {
        #[command(subcommand)]
        op: EndpointOp,
    },
    /// Existing instances joined as workers (`clusterId#instanceId`)
    Worker {
        #[command(subcommand)]
        op: WorkerOp,
    },
    /// RBAC grants of one principal (`clusterId#principal`)
    Permissions {
        #[command(subcommand)]
        op: PermissionsOp,
    },
    /// List resources recorded in the ledger
    Ls {
        /// Only this kind, e.g. "cluster" or "node_pool"
        #[arg(long)]
        kind: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum ClusterOp {
    Create(ClusterArgs),
    Read { id: String },
    Update {
        id: String,
        #[command(flatten)]
        spec: ClusterArgs,
    },
    Delete { id: String },
}

#[derive(Args, Debug)]
struct ClusterArgs {
    #[arg(long)]
    name: String,
    #[arg(long, default_value = "1.28.3")]
    version: String,
    #[arg(long = "vpc", default_value = "vpc-default")]
    vpc_id: String,
    #[arg(long, default_value = "172.16.0.0/16")]
    cidr: String,
    #[arg(long, default_value = "")]
    description: String,
}

impl From<ClusterArgs> for ClusterSpec {
    fn from(a: ClusterArgs) -> Self {
        ClusterSpec { name: a.name, version: a.version, vpc_id: a.vpc_id, cidr: a.cidr, description: a.description }
    }
}

#[derive(Subcommand, Debug)]
enum NodePoolOp {
    Create {
        #[arg(long)]
        cluster: String,
        #[arg(long)]
        name: String,
        #[arg(long, default_value_t = 1)]
        desired: u64,
        #[arg(long, default_value_t = 0)]
        min: u64,
        #[arg(long, default_value_t = 10)]
        max: u64,
        #[arg(long = "instance-type", default_value = "S5.MEDIUM4")]
        instance_type: String,
    },
    Read { id: String },
    Delete { id: String },
}

#[derive(Subcommand, Debug)]
enum EndpointOp {
    Enable {
        #[arg(long)]
        cluster: String,
        /// internet or intranet
        #[arg(long, default_value = "internet")]
        access: EndpointAccess,
        #[arg(long)]
        subnet: Option<String>,
        #[arg(long = "security-group")]
        security_group: Option<String>,
        #[arg(long)]
        domain: Option<String>,
    },
    Disable { id: String },
    /// Public address of a managed cluster
    EnableVip {
        #[arg(long)]
        cluster: String,
        /// Allowed source CIDR; repeat for more
        #[arg(long = "policy")]
        policies: Vec<String>,
    },
    DisableVip { id: String },
}

#[derive(Subcommand, Debug)]
enum WorkerOp {
    Attach {
        #[arg(long)]
        cluster: String,
        #[arg(long)]
        instance: String,
        #[arg(long = "key-id")]
        key_ids: Vec<String>,
        #[arg(long)]
        unschedulable: bool,
    },
    Read { id: String },
    Detach { id: String },
}

#[derive(Subcommand, Debug)]
enum PermissionsOp {
    /// Make the principal hold exactly the given grants (none revokes all)
    Apply {
        #[arg(long)]
        cluster: String,
        #[arg(long)]
        principal: String,
        /// `role` or `role:namespace`; repeat for more
        #[arg(long = "grant")]
        grants: Vec<GrantArg>,
    },
    Read { id: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct GrantArg {
    role: String,
    namespace: String,
}

impl FromStr for GrantArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (role, namespace) = s.split_once(':').unwrap_or((s, ""));
        if role.is_empty() {
            return Err(format!("empty role in {:?}", s));
        }
        Ok(Self { role: role.to_string(), namespace: namespace.to_string() })
    }
}

fn init_tracing() {
    let env = std::env::var("CONVERGE_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("CONVERGE_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid CONVERGE_METRICS_ADDR; expected host:port");
        }
    }
}

/// Everything one command needs; built once in `main` and passed down.
struct Ctx {
    client: Arc<dyn RemoteClient>,
    ledger: SqliteLedger,
    timeouts: Timeouts,
    cancel: CancelToken,
    output: Output,
}

impl Ctx {
    fn orchestrator<K: ResourceKind>(&self, kind: K) -> Orchestrator<K> {
        Orchestrator::new(self.client.clone(), kind, self.timeouts)
    }

    fn emit<T: Serialize>(&self, value: &T, human: &str) -> Result<()> {
        match self.output {
            Output::Human => println!("{}", human),
            Output::Json => println!("{}", serde_json::to_string_pretty(value)?),
        }
        Ok(())
    }
}

async fn create<K: ResourceKind>(ctx: &Ctx, kind: K, spec: &K::Spec) -> Result<()> {
    let orch = ctx.orchestrator(kind);
    let id = orch.create(spec, &ctx.cancel).await?.encode();
    // The create already converged; a failed re-read only costs the label.
    let label = match orch.read(&id, &ctx.cancel).await {
        Ok(Some(st)) => st.label,
        _ => "created".to_string(),
    };
    ctx.ledger.record(&LedgerEntry::new(K::KIND, &id, &label))?;
    info!(kind = K::KIND, id = %id, "recorded in ledger");
    ctx.emit(&json!({"kind": K::KIND, "identity": id, "state": label}), &format!("{} {} created ({})", K::KIND, id, label))
}

async fn read<K: ResourceKind>(ctx: &Ctx, kind: K, id: &str) -> Result<()> {
    match ctx.orchestrator(kind).read(id, &ctx.cancel).await? {
        Some(st) => {
            ctx.ledger.record(&LedgerEntry::new(K::KIND, id, &st.label))?;
            let human = format!("{} {} {} {}", K::KIND, st.identity, st.label, st.detail);
            ctx.emit(&st, human.trim_end())
        }
        None => {
            if ctx.ledger.forget(K::KIND, id)? {
                warn!(kind = K::KIND, id, "resource is gone; dropped from ledger");
            }
            ctx.emit(&json!({"kind": K::KIND, "identity": id, "state": null}), &format!("{} {} not found", K::KIND, id))
        }
    }
}

async fn update<K: ResourceKind>(ctx: &Ctx, kind: K, id: &str, spec: &K::Spec) -> Result<()> {
    let orch = ctx.orchestrator(kind);
    orch.update(id, spec, &ctx.cancel).await?;
    if let Some(st) = orch.read(id, &ctx.cancel).await? {
        ctx.ledger.record(&LedgerEntry::new(K::KIND, id, &st.label))?;
    }
    ctx.emit(&json!({"kind": K::KIND, "identity": id, "updated": true}), &format!("{} {} updated", K::KIND, id))
}

async fn delete<K: ResourceKind>(ctx: &Ctx, kind: K, id: &str) -> Result<()> {
    ctx.orchestrator(kind).delete(id, &ctx.cancel).await?;
    ctx.ledger.forget(K::KIND, id)?;
    ctx.emit(&json!({"kind": K::KIND, "identity": id, "deleted": true}), &format!("{} {} deleted", K::KIND, id))
}

const PERMISSION_SET: &str = "permission_set";

/// Seed the simulated control plane with what earlier runs recorded so their
/// identities resolve. Returns how many rows were restored.
fn seed(sim: &SimCloud, ledger: &dyn Ledger) -> Result<usize> {
    let mut restored = 0usize;
    for e in ledger.list(None)? {
        if e.kind == PERMISSION_SET {
            let Ok(id) = ResourceIdentity::decode(&e.identity, 2) else {
                warn!(id = %e.identity, "unreadable permission set identity in ledger; skipped");
                continue;
            };
            let grants: Vec<Grant> = match e.data.as_deref().map(|d| serde_json::from_str::<Vec<Grant>>(d)).transpose() {
                Ok(g) => g.unwrap_or_default(),
                Err(err) => {
                    warn!(id = %e.identity, error = %err, "unreadable grants in ledger; skipped");
                    continue;
                }
            };
            sim.restore_grants(id.part(0), id.part(1), grants.iter().map(|g| (g.role.as_str(), g.namespace.as_str())));
            restored += 1;
        } else if sim.restore(&e.kind, &e.identity) {
            restored += 1;
        }
    }
    Ok(restored)
}

async fn run(ctx: &Ctx, command: Commands) -> Result<()> {
    match command {
        Commands::Cluster { op } => match op {
            ClusterOp::Create(a) => create(ctx, Cluster, &ClusterSpec::from(a)).await,
            ClusterOp::Read { id } => read(ctx, Cluster, &id).await,
            ClusterOp::Update { id, spec } => update(ctx, Cluster, &id, &ClusterSpec::from(spec)).await,
            ClusterOp::Delete { id } => delete(ctx, Cluster, &id).await,
        },
        Commands::Nodepool { op } => match op {
            NodePoolOp::Create { cluster, name, desired, min, max, instance_type } => {
                let spec = NodePoolSpec { cluster_id: cluster, name, desired_capacity: desired, min_size: min, max_size: max, instance_type };
                create(ctx, NodePool, &spec).await
            }
            NodePoolOp::Read { id } => read(ctx, NodePool, &id).await,
            NodePoolOp::Delete { id } => delete(ctx, NodePool, &id).await,
        },
        Commands::Endpoint { op } => match op {
            EndpointOp::Enable { cluster, access, subnet, security_group, domain } => {
                let spec = EndpointSpec { cluster_id: cluster, access, subnet_id: subnet, security_group, domain };
                create(ctx, ClusterEndpoint, &spec).await
            }
            EndpointOp::Disable { id } => delete(ctx, ClusterEndpoint, &id).await,
            EndpointOp::EnableVip { cluster, policies } => {
                create(ctx, ClusterEndpointVip, &EndpointVipSpec { cluster_id: cluster, security_policies: policies }).await
            }
            EndpointOp::DisableVip { id } => delete(ctx, ClusterEndpointVip, &id).await,
        },
        Commands::Worker { op } => match op {
            WorkerOp::Attach { cluster, instance, key_ids, unschedulable } => {
                let spec = AttachmentSpec { cluster_id: cluster, instance_id: instance, key_ids, password: None, unschedulable };
                create(ctx, ClusterAttachment, &spec).await
            }
            WorkerOp::Read { id } => read(ctx, ClusterAttachment, &id).await,
            WorkerOp::Detach { id } => delete(ctx, ClusterAttachment, &id).await,
        },
        Commands::Permissions { op } => match op {
            PermissionsOp::Apply { cluster, principal, grants } => {
                let perms = PermissionSet::new(ctx.client.clone(), ctx.timeouts);
                let id = ResourceIdentity::new([cluster.as_str(), principal.as_str()])?.encode();
                let desired: Vec<Grant> = grants.iter().map(|g| Grant::new(&cluster, &principal, &g.role, &g.namespace)).collect();
                let delta = perms.apply(&id, &desired, &ctx.cancel).await?;
                if desired.is_empty() {
                    ctx.ledger.forget(PERMISSION_SET, &id)?;
                } else {
                    let entry = LedgerEntry::new(PERMISSION_SET, &id, "applied").with_data(serde_json::to_string(&desired)?);
                    ctx.ledger.record(&entry)?;
                }
                let human = format!("{} {}: granted {}, revoked {}", PERMISSION_SET, id, delta.to_add.len(), delta.to_remove.len());
                ctx.emit(&delta, &human)
            }
            PermissionsOp::Read { id } => {
                let grants = PermissionSet::new(ctx.client.clone(), ctx.timeouts).read(&id, &ctx.cancel).await?;
                let human = grants
                    .iter()
                    .map(|g| if g.namespace.is_empty() { g.role.clone() } else { format!("{}:{}", g.role, g.namespace) })
                    .collect::<Vec<_>>()
                    .join("\n");
                ctx.emit(&grants, &human)
            }
        },
        Commands::Ls { kind } => {
            let rows = ctx.ledger.list(kind.as_deref())?;
            let human = rows
                .iter()
                .map(|e| format!("{:<22} {:<36} {:<12} {}", e.kind, e.identity, e.label, e.ts))
                .collect::<Vec<_>>()
                .join("\n");
            ctx.emit(&rows, &human)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();
    init_metrics();
    let started = Instant::now();

    let ledger = match &cli.db {
        Some(path) => SqliteLedger::open(path)?,
        None => SqliteLedger::open_default()?,
    };
    // The simulated control plane lives for one process.
    let sim = Arc::new(SimCloud::new(cli.sim_steps));
    let restored = seed(&sim, &ledger)?;
    info!(restored, steps = cli.sim_steps, "simulated control plane ready");

    let mut timeouts = Timeouts::from_env();
    if let Some(ms) = cli.poll_interval_ms {
        timeouts.poll_interval = Duration::from_millis(ms);
    }
    if let Some(secs) = cli.read_timeout_secs {
        timeouts.read = Duration::from_secs(secs);
    }

    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if signal::ctrl_c().await.is_ok() {
                warn!("Ctrl-C received; cancelling in-flight operation");
                cancel.cancel();
            }
        });
    }

    let ctx = Ctx { client: sim, ledger, timeouts, cancel, output: cli.output };
    let res = run(&ctx, cli.command).await;
    histogram!("cli_command_ms", started.elapsed().as_secs_f64() * 1000.0);
    res
}
