use anyhow::Result;
use rand::Rng;
use simkernel::prelude::*;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// State shared by every entity of the bank model.
#[derive(Default)]
struct Bank {
    queue: RefCell<VecDeque<ActionId>>,
    arrivals: Cell<u32>,
    served: Cell<u32>,
    reneged: Cell<u32>,
}

/// Customers stay at most this long in the queue.
const PATIENCE: f64 = 6.0;
/// The doors close at this date; every waiting customer leaves.
const CLOSING_TIME: f64 = 60.0;

fn main() -> Result<()> {
    // 1. Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    // 2. Load the configuration, from a file if one is given.
    let config = match std::env::args().nth(1) {
        Some(path) => SimConfig::load(path)?,
        None => SimConfig::default(),
    };
    let seed = config.seed.unwrap_or(42);
    info!("{} v{} bank demo, seed {}", simkernel::ENGINE_NAME, simkernel::VERSION, seed);

    // 3. Run the same model twice with the same seed.
    let first = run_bank(config.clone(), seed)?;
    let second = run_bank(config, seed)?;

    // 4. Both runs must resolve the exact same instants.
    anyhow::ensure!(first == second, "runs with seed {} diverged", seed);
    info!(
        "both runs agree: {} instants, {} events, ended at t={}",
        first.instants.len(),
        first.fired_count(),
        first.end_time
    );
    Ok(())
}

/// Builds a fresh bank model and runs it to completion.
fn run_bank(config: SimConfig, seed: u64) -> Result<RunReport> {
    let mut sim = Simulator::new(config);
    let bank = Rc::new(Bank::default());
    let channel = sim.channel();

    let branch = sim.spawn("bank", Container)?;
    sim.spawn_in(branch, "clerk", Clerk { bank: bank.clone(), channel })?;
    let doors = sim.spawn_in(
        branch,
        "doors",
        Doors { bank: bank.clone(), channel, branch },
    )?;
    let closer = sim.spawn_in(branch, "closer", Closer { channel })?;
    // The doors open ahead of the clerk; the closer is the first to stop.
    sim.set_initialize_priority(doors, -1)?;
    sim.set_finalize_priority(closer, 1)?;

    let report = sim.single_run(None, Some(seed))?;
    info!(
        "t={}: {} arrivals, {} served, {} reneged",
        report.end_time,
        bank.arrivals.get(),
        bank.served.get(),
        bank.reneged.get()
    );
    Ok(report)
}

/// Serves queued customers one at a time; idles on the `arrival` topic.
struct Clerk {
    bank: Rc<Bank>,
    channel: ChannelId,
}

impl Behavior for Clerk {
    fn initialize(&mut self, sim: &mut Simulator, _me: EntityId) -> SimResult<Option<Act>> {
        let bank = self.bank.clone();
        let channel = self.channel;
        let mut serving: Option<ActionId> = None;
        let body = move |sim: &mut Simulator, _input: Resume| -> SimResult<Step> {
            if let Some(request) = serving.take() {
                if sim.is_active(request) {
                    let done_at = sim.now();
                    sim.succeed(request, Value::new(done_at))?;
                }
            }
            loop {
                let next = bank.queue.borrow_mut().pop_front();
                match next {
                    Some(request) if matches!(sim.status(request), Ok(Status::Pending)) => {
                        serving = Some(request);
                        let service = sim.rng().gen_range(1.0..4.0);
                        return Ok(Step::wait(service));
                    }
                    Some(_) => continue,
                    None => break,
                }
            }
            let arrival = sim.listener(channel, Some("arrival"), 0)?;
            Ok(Step::wait(arrival))
        };
        Ok(Some(sim.chain(body).into()))
    }
}

/// Lets customers in at random intervals until closing time.
struct Doors {
    bank: Rc<Bank>,
    channel: ChannelId,
    branch: EntityId,
}

impl Behavior for Doors {
    fn reset(&mut self, _sim: &mut Simulator, _me: EntityId) -> SimResult<()> {
        self.bank.arrivals.set(0);
        self.bank.served.set(0);
        self.bank.reneged.set(0);
        self.bank.queue.borrow_mut().clear();
        Ok(())
    }

    fn initialize(&mut self, sim: &mut Simulator, me: EntityId) -> SimResult<Option<Act>> {
        let bank = self.bank.clone();
        let channel = self.channel;
        let branch = self.branch;
        let arrive = sim.chain_with(move || {
            let bank = bank.clone();
            let mut waited = false;
            move |sim: &mut Simulator, _input: Resume| -> SimResult<Step> {
                if !waited {
                    waited = true;
                    let gap = sim.rng().gen_range(0.5..3.0);
                    return Ok(Step::wait(gap));
                }
                let n = bank.arrivals.get() + 1;
                bank.arrivals.set(n);
                let customer = Customer { bank: bank.clone(), channel };
                let entity = sim.spawn_in(branch, &format!("customer{}", n), customer)?;
                sim.launch(entity, Some(me))?;
                Ok(Step::Done)
            }
        });
        let open = sim.forever(arrive)?;
        let closing = sim.listener(channel, Some("closing"), 0)?;
        Ok(Some(sim.unless(closing, open)?.into()))
    }
}

/// Queues for the clerk, reneging on impatience or at closing time.
struct Customer {
    bank: Rc<Bank>,
    channel: ChannelId,
}

impl Behavior for Customer {
    fn initialize(&mut self, sim: &mut Simulator, _me: EntityId) -> SimResult<Option<Act>> {
        let service = sim.request();
        let patience = sim.delay(PATIENCE)?;
        let closing = sim.listener(self.channel, Some("closing"), 1)?;
        let escape = sim.or(patience, closing)?;
        let wait = sim.unless(escape, service)?;

        let served = self.bank.clone();
        let reneged = self.bank.clone();
        let hooks = Hooks::new()
            .on_succeed(move |_, _| {
                served.served.set(served.served.get() + 1);
                Ok(())
            })
            .on_fail(move |_, _| {
                reneged.reneged.set(reneged.reneged.get() + 1);
                Ok(())
            });
        let visit = sim.callback(wait, hooks)?;

        self.bank.queue.borrow_mut().push_back(service);
        sim.broadcast(self.channel, "arrival", Value::none())?;
        Ok(Some(visit.into()))
    }
}

/// Broadcasts `closing` once the doors are due to shut.
struct Closer {
    channel: ChannelId,
}

impl Behavior for Closer {
    fn initialize(&mut self, sim: &mut Simulator, _me: EntityId) -> SimResult<Option<Act>> {
        let channel = self.channel;
        let mut closed = false;
        let body = sim.chain(move |sim: &mut Simulator, _input: Resume| -> SimResult<Step> {
            if closed {
                let woken = sim.broadcast(channel, "closing", Value::none())?;
                info!("closing at t={}, {} listeners woken", sim.now(), woken);
                return Ok(Step::Done);
            }
            closed = true;
            Ok(Step::wait(CLOSING_TIME))
        });
        Ok(Some(body.into()))
    }
}
