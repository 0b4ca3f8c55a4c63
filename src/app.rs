use std::{
    fs,
    io::{self, Read as _, Write as _},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use anyhow::{anyhow, Result};
use bytes::Bytes;
use chrono::Utc;
use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError};
use tokio::runtime::Runtime;

use crate::{
    api::{endpoint::ResourceTarget, AuthenticatedFetch, ClusterContext, Fetch, SessionEvent},
    cache::ResourceQueryKey,
    cmd::{
        canonical_kind, Command, HelmCommand, ListArgs, QuotaArgs, ReleaseArgs, SubCommand,
        TargetArgs,
    },
    config::Config,
    features::{
        editor::{template::template, validate_document, EditorTarget, QuotaEditor, YamlEditor},
        exec::{ExecEvent, ExecInput, ExecSession, ExecTarget},
        helm::{self, Helm, InstallRequest, UpgradeRequest},
        list::{table::ResourceTable, ResourceListView},
        mutation::{AssumeYes, Confirm, DeleteMode, MutationRequest, Mutator, PromptConfirm},
        resource::ResourceCache,
    },
    logger,
    workers::{PollEvent, Poller, Worker as _},
};

const RECV_TIMEOUT: Duration = Duration::from_millis(200);

pub struct App {
    runtime: Runtime,
    fetch: Arc<AuthenticatedFetch>,
    cache: ResourceCache,
    mutator: Mutator,
    config: Config,
    is_terminated: Arc<AtomicBool>,
}

impl App {
    pub fn run(cmd: Command, mut config: Config) -> Result<()> {
        cmd.apply_overrides(&mut config);

        let app = Self::new(&cmd, config)?;

        logger!(info, "app start");

        let result = app.dispatch(cmd.subcommand);

        logger!(info, "app end");

        result
    }

    fn new(cmd: &Command, config: Config) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;

        let cluster = ClusterContext::resolve(
            config.server.cluster.clone(),
            config.server.cluster_from_kubeconfig,
            cmd.kubeconfig.clone(),
        )?;

        let (tx_session, rx_session) = unbounded();

        let fetch = AuthenticatedFetch::builder(&config.server.base_url)
            .session_cookie(config.server.session_cookie.clone())
            .timeout(config.server.timeout_secs.map(Duration::from_secs))
            .cluster(cluster)
            .session_events(tx_session)
            .build()?;

        let fetch = Arc::new(fetch);

        thread::spawn(move || watch_session(rx_session));

        let is_terminated = Arc::new(AtomicBool::new(false));

        {
            let is_terminated = is_terminated.clone();
            ctrlc::set_handler(move || {
                logger!(info, "interrupted");
                is_terminated.store(true, Ordering::Relaxed);
            })?;
        }

        let cache = ResourceCache::new();
        let mutator = Mutator::new(fetch.clone(), cache.clone(), config.refetch);

        Ok(Self {
            runtime,
            fetch,
            cache,
            mutator,
            config,
            is_terminated,
        })
    }

    fn dyn_fetch(&self) -> Arc<dyn Fetch> {
        self.fetch.clone()
    }

    fn dispatch(&self, subcommand: SubCommand) -> Result<()> {
        match subcommand {
            SubCommand::List(args) => self.list(&args),
            SubCommand::Get(target) => self.get(&target),
            SubCommand::Template { kind, namespace } => {
                print!("{}", template(&kind, namespace.as_deref())?);
                Ok(())
            }
            SubCommand::Apply { file } => {
                let document = fs::read_to_string(&file)?;
                self.apply(document)
            }
            SubCommand::Replace { target, file } => {
                let document = fs::read_to_string(&file)?;
                self.replace(&target, document)
            }
            SubCommand::Delete { target, force, yes } => self.delete(&target, force, yes),
            SubCommand::Quota(args) => self.quota(&args),
            SubCommand::Helm(command) => self.helm(command),
            SubCommand::Exec {
                pod,
                namespace,
                container,
            } => self.exec(ExecTarget::new(namespace, pod).container(container)),
        }
    }

    fn list(&self, args: &ListArgs) -> Result<()> {
        let key = ResourceQueryKey::new(args.collection())
            .cluster(&self.fetch.cluster())
            .namespace(args.namespace());

        let _guard = self.runtime.enter();

        let mut view = ResourceListView::new(
            self.mutator.clone(),
            self.dyn_fetch(),
            self.cache.clone(),
            key.clone(),
        );

        view.set_filter(args.filter.as_deref().unwrap_or_default());
        view.set_scope(args.scope);
        view.set_sort(args.sort_state());
        view.mount();

        // the banner carries the error
        let _ = self.runtime.block_on(view.load());

        if !print_view(&view) && !args.watch {
            return Err(anyhow!("failed to list {}", key));
        }

        if !args.watch {
            return Ok(());
        }

        let (tx, rx) = unbounded();

        let poller = Poller::new(
            self.is_terminated.clone(),
            tx,
            self.dyn_fetch(),
            self.cache.clone(),
            key,
            self.config.refetch.poll_interval(),
        );

        let handle = poller.spawn();

        self.follow(&rx, |_: PollEvent| {
            view.sync();
            println!();
            print_view(&view);
        });

        self.is_terminated.store(true, Ordering::Relaxed);
        handle.abort();

        Ok(())
    }

    /// Receives until Ctrl-C or until the sender goes away.
    fn follow<T>(&self, rx: &Receiver<T>, mut on_event: impl FnMut(T)) {
        while !self.is_terminated.load(Ordering::Relaxed) {
            match rx.recv_timeout(RECV_TIMEOUT) {
                Ok(event) => on_event(event),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    fn get(&self, target: &TargetArgs) -> Result<()> {
        let mut editor = YamlEditor::new(self.dyn_fetch());

        self.runtime
            .block_on(editor.open_existing(resource_target(target)))?;

        if let Some(document) = editor.document() {
            print!("{}", document);
        }

        Ok(())
    }

    fn apply(&self, document: String) -> Result<()> {
        let summaries = validate_document(&document)?;

        let kind = summaries
            .first()
            .map(|s| s.kind.to_string())
            .unwrap_or_default();

        let mut editor = YamlEditor::new(self.dyn_fetch()).on_saved(|saved| {
            println!("{} {}", saved.mutation.subject, saved.mutation.kind);
        });

        editor.open_document(EditorTarget::New { kind }, document)?;

        self.runtime.block_on(editor.save())?;

        Ok(())
    }

    fn replace(&self, target: &TargetArgs, document: String) -> Result<()> {
        let mut editor = YamlEditor::new(self.dyn_fetch()).on_saved(|saved| {
            println!("{} {}", saved.mutation.subject, saved.mutation.kind);
        });

        editor.open_document(EditorTarget::Existing(resource_target(target)), document)?;

        self.runtime.block_on(editor.save())?;

        Ok(())
    }

    fn delete(&self, target: &TargetArgs, force: bool, yes: bool) -> Result<()> {
        let mode = if force {
            DeleteMode::Force
        } else {
            DeleteMode::Graceful
        };

        self.mutate(MutationRequest::delete(&resource_target(target), mode), yes)
    }

    /// Confirms, runs and reports a mutation. The delayed refetch is dropped
    /// since nothing is cached beyond this command.
    fn mutate(&self, mutation: MutationRequest, yes: bool) -> Result<()> {
        if !confirmer(yes).confirm(&mutation.confirmation())? {
            println!("cancelled");
            return Ok(());
        }

        let subject = mutation.subject.to_string();
        let kind = mutation.kind;

        let outcome = self.runtime.block_on(self.mutator.execute(mutation))?;
        outcome.refetch.cancel();

        println!("{} {}", subject, kind);

        Ok(())
    }

    fn quota(&self, args: &QuotaArgs) -> Result<()> {
        let mut editor = QuotaEditor::new(self.dyn_fetch()).on_saved(|saved| {
            println!("{} {}", saved.mutation.subject, saved.mutation.kind);
        });

        if args.edit {
            self.runtime
                .block_on(editor.open_existing(&args.name, &args.namespace))?;
        } else {
            editor.open_new(&args.namespace)?;
            editor.form_mut().name = args.name.to_string();
        }

        let form = editor.form_mut();

        for (resource, quantity) in &args.limits {
            form.set_limit(resource, quantity);
        }

        for resource in &args.remove {
            form.remove_limit(resource);
        }

        self.runtime.block_on(editor.save())?;

        Ok(())
    }

    fn helm(&self, command: HelmCommand) -> Result<()> {
        let helm = Helm::new(self.mutator.clone(), self.dyn_fetch(), self.cache.clone());

        match command {
            HelmCommand::List {
                namespace,
                all_namespaces,
            } => {
                let namespace = if all_namespaces {
                    None
                } else {
                    Some(namespace.unwrap_or_else(|| "default".to_string()))
                };

                let releases = self.runtime.block_on(helm.releases(namespace.as_deref()))?;

                let rows: Vec<_> = releases.iter().collect();
                println!("{}", ResourceTable::build(&rows, Utc::now()).render());
            }
            HelmCommand::Install(args) => {
                let request = InstallRequest {
                    name: args.name.to_string(),
                    namespace: args.namespace.to_string(),
                    chart: args.chart.to_string(),
                    version: args.version.clone(),
                    values: read_values(&args)?,
                };

                let job = self.runtime.block_on(helm.install(&request))?;
                job.refetch.cancel();

                println!("install job {}", job.job_id);
            }
            HelmCommand::Upgrade(args) => {
                let request = UpgradeRequest {
                    name: args.name.to_string(),
                    namespace: args.namespace.to_string(),
                    chart: args.chart.to_string(),
                    version: args.version.clone(),
                    values: read_values(&args)?,
                };

                let job = self.runtime.block_on(helm.upgrade(&request))?;
                job.refetch.cancel();

                println!("upgrade job {}", job.job_id);
            }
            HelmCommand::Uninstall {
                name,
                namespace,
                yes,
            } => {
                let mutation = helm::uninstall(&name, &namespace)?;

                if !confirmer(yes).confirm(&mutation.confirmation())? {
                    println!("cancelled");
                    return Ok(());
                }

                let job = self.runtime.block_on(helm.uninstall(&name, &namespace))?;
                job.refetch.cancel();

                println!("uninstall job {}", job.job_id);
            }
        }

        Ok(())
    }

    fn exec(&self, target: ExecTarget) -> Result<()> {
        let session = ExecSession::connect(&self.fetch, &target)?;

        let (tx_stdin, rx_stdin) = unbounded::<Bytes>();

        thread::spawn(move || {
            let mut stdin = io::stdin();
            let mut buf = [0u8; 1024];

            loop {
                match stdin.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if tx_stdin.send(Bytes::copy_from_slice(&buf[..n])).is_err() {
                            break;
                        }
                    }
                }
            }
        });

        let mut stdout = io::stdout();

        while !self.is_terminated.load(Ordering::Relaxed) {
            for input in rx_stdin.try_iter() {
                session.send(ExecInput::Stdin(input))?;
            }

            match session.events().recv_timeout(Duration::from_millis(20)) {
                Ok(ExecEvent::Output(bytes)) => {
                    stdout.write_all(&bytes)?;
                    stdout.flush()?;
                }
                Ok(ExecEvent::Closed) | Err(RecvTimeoutError::Disconnected) => break,
                Ok(ExecEvent::Error(message)) => {
                    session.close();
                    return Err(anyhow!(message));
                }
                Err(RecvTimeoutError::Timeout) => {}
            }
        }

        session.close();

        Ok(())
    }
}

fn resource_target(target: &TargetArgs) -> ResourceTarget {
    let kind = canonical_kind(&target.kind);

    match &target.namespace {
        Some(ns) => ResourceTarget::namespaced(kind, &target.name, ns),
        None => ResourceTarget::new(kind, &target.name),
    }
}

fn confirmer(yes: bool) -> Box<dyn Confirm> {
    if yes {
        Box::new(AssumeYes)
    } else {
        Box::new(PromptConfirm)
    }
}

fn read_values(args: &ReleaseArgs) -> Result<Option<serde_json::Value>> {
    let Some(path) = &args.values else {
        return Ok(None);
    };

    let values: serde_json::Value = serde_yaml::from_str(&fs::read_to_string(path)?)?;

    Ok(Some(values))
}

/// Prints the table, or the banner on stderr. Returns false on error.
fn print_view(view: &ResourceListView) -> bool {
    let state = view.state();

    if let Some(banner) = &state.banner {
        eprintln!("error: {}", banner);
        return false;
    }

    let table = view.table(Utc::now());

    if table.is_empty() {
        println!("No resources found.");
    } else {
        println!("{}", table.render());
    }

    true
}

fn watch_session(rx: Receiver<SessionEvent>) {
    for event in rx {
        match event {
            SessionEvent::LoggedOut => {
                logger!(warn, "session expired");
                eprintln!("session expired: log in again and update server.session_cookie");
            }
        }
    }
}
