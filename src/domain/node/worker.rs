use std::time::Instant;

use crate::api::message::Message;
use crate::domain::load::{ImbalanceDetector, LoadWindow};
use crate::domain::model::{Job, NodeInfo};
use crate::domain::node::{Node, NodePhase};
use crate::domain::sync::lock;

enum Dequeued {
    Job(Job),
    Empty,
    Suspended,
}

impl Node {
    /// The worker loop: execute queued jobs, track the load and keep the hierarchy informed.
    ///
    /// Returns once the node is stopped. The load tracker is frozen on the way out.
    pub async fn run(&self) {
        tokio::select! {
            installed = self.wait_for_hierarchy() => if !installed { return self.finish() },
            _ = self.shutdown.cancelled() => return self.finish(),
        }

        let balancer = self.config.balancer.clone();
        let mut detector = ImbalanceDetector::new(balancer.imbalance_threshold, balancer.cooldown, Instant::now());
        log::info!("{} starts working", self.me);

        while !self.shutdown.is_cancelled() {
            self.wait_until_resumed().await;

            match self.dequeue() {
                Dequeued::Suspended => continue,
                Dequeued::Job(job) => {
                    self.load_tracker.start_work();
                    let description = job.to_string();
                    match tokio::task::spawn_blocking(move || job.execute()).await {
                        Ok(result) => log::trace!("{} finished {} = {}", self.me, description, result),
                        Err(e) => log::error!("{} failed to execute {}: {}", self.me, description, e),
                    }
                    self.load_tracker.end_work();
                }
                Dequeued::Empty => {
                    self.load_tracker.start_sleep();
                    tokio::select! {
                        _ = self.work_available.notified() => {}
                        _ = tokio::time::sleep(balancer.idle_wait) => {}
                        _ = self.shutdown.cancelled() => {}
                    }
                    self.load_tracker.end_sleep();
                }
            }

            let load = self.load_tracker.get_load(LoadWindow::Trailing(balancer.load_window));
            let Some((loads, parent)) = self.highest_level_loads(load) else {
                continue;
            };

            match parent {
                None => {
                    if detector.check(&loads, Instant::now()) {
                        log::info!("{} detected an imbalance across {:?}, rebalancing", self.me, loads);
                        self.rebalance().await;
                    }
                }
                Some(parent) => {
                    let average = loads.iter().sum::<f64>() / loads.len() as f64;
                    let report = Message::LoadInfo { node: self.me.clone(), load: average };
                    self.transport.send_async(report, &parent.address, parent.port, None);
                }
            }
        }

        self.finish();
    }

    fn finish(&self) {
        self.load_tracker.done();
        self.phase.send_replace(NodePhase::Stopped);
        log::info!("{} stopped", self.me);
    }

    /// Pops the next job unless a rebalance holds the queue.
    fn dequeue(&self) -> Dequeued {
        let mut state = lock(&self.state);
        if self.is_balancing() {
            return Dequeued::Suspended;
        }
        match state.queue.pop_front() {
            Some(job) => Dequeued::Job(job),
            None => Dequeued::Empty,
        }
    }

    fn highest_level_loads(&self, own: f64) -> Option<(Vec<f64>, Option<NodeInfo>)> {
        let state = lock(&self.state);
        let topology = state.topology.as_ref()?;
        Some((topology.highest_level_loads(own), topology.parent().cloned()))
    }
}
