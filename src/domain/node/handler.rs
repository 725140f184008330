use async_trait::async_trait;

use crate::api::message::Message;
use crate::domain::hierarchy::{Hierarchy, build_hierarchy};
use crate::domain::node::Node;
use crate::domain::sync::lock;
use crate::net::{MessageHandler, Responder};

#[async_trait]
impl MessageHandler for Node {
    async fn handle(&self, message: Message, responder: Responder) {
        log::trace!("{} received {} from {}", self.me, message.kind(), responder.peer());

        match message {
            Message::BuildHierarchy { branching_factor, nodes } => {
                log::info!("{} is building a hierarchy over {} nodes", self.me, nodes.len());
                match build_hierarchy(&nodes, branching_factor) {
                    Ok(hierarchy) => {
                        let dto = hierarchy.to_dto();
                        self.install_hierarchy(hierarchy);
                        responder.respond(Message::Hierarchy { hierarchy: dto }).await;
                    }
                    Err(e) => {
                        log::error!("{} cannot build the hierarchy: {}", self.me, e);
                        responder.respond(Message::ResponseMessage { text: e.to_string() }).await;
                    }
                }
            }

            Message::Hierarchy { hierarchy } => {
                responder.close();
                self.install_hierarchy(Hierarchy::from_dto(hierarchy));
            }

            Message::DoWork { job } => {
                responder.close();
                self.enqueue(job);
            }

            Message::LoadInfo { node, load } => {
                responder.close();
                let known = lock(&self.state).topology.as_mut().is_some_and(|t| t.record_load(&node, load));
                if !known {
                    log::debug!("{} ignores a load report from {}", self.me, node);
                }
            }

            Message::CollectJobs { operation } => {
                responder.close();
                let Some(parent) = self.parent() else {
                    log::warn!("{} was asked for its jobs but has no parent", self.me);
                    return;
                };
                self.suspend();

                let collection = self.collect_job_infos(operation).await;
                let report = Message::JobInfoList { operation, sender: self.me.clone(), jobs: collection.jobs };
                if !self.transport.deliver(report, &parent.address, parent.port).await {
                    log::warn!("{} could not report its jobs to {}", self.me, parent);
                }
            }

            Message::JobInfoList { operation, sender, jobs } => {
                responder.close();
                self.file_job_list(operation, sender, jobs);
            }

            Message::LoadBalancingResult { operation, transfers } => {
                responder.close();
                log::debug!("{} got {} transfers for operation {}", self.me, transfers.len(), operation);
                match self.take_inventories(operation) {
                    Some(levels) => self.propagate(operation, &levels, transfers).await,
                    None => log::warn!("{} dropped the results of operation {}", self.me, operation),
                }
            }

            Message::JobTransferRequest { requester, job_ids } => {
                let jobs = self.give_jobs(&requester, &job_ids);
                responder.respond(Message::TransferredJobs { jobs }).await;
                self.finish_operations(job_ids.len());
            }

            other => {
                log::warn!("{} does not handle {} messages", self.me, other.kind());
                responder.close();
            }
        }
    }
}
