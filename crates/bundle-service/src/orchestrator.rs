//! Deploy, destroy and status workflows
//!
//! An [`Orchestrator`] is scoped to one user and one request. It drives the
//! remote controller and stages record changes in the request's [`Session`];
//! committing or rolling back those changes is left to the caller.

use bundle_common::{BundleRecord, BundleStatus, Error, Result, ServiceRecord};
use bundle_parser::{generate_bundle_id, service_id, BundleParser};
use tracing::{debug, info, warn};

use crate::controller::RemoteController;
use crate::storage::Session;

/// Attempts at generating a bundle id that is not already stored
pub const MAX_ID_ATTEMPTS: usize = 5;

pub struct Orchestrator<'a> {
    user_id: String,
    controller: &'a dyn RemoteController,
    session: &'a mut Session,
    /// Services deployed on the controller by this orchestrator, in order
    deployed: Vec<String>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        user_id: &str,
        controller: &'a dyn RemoteController,
        session: &'a mut Session,
    ) -> Self {
        Self {
            user_id: user_id.to_string(),
            controller,
            session,
            deployed: Vec::new(),
        }
    }

    pub fn deployed_services(&self) -> &[String] {
        &self.deployed
    }

    pub fn into_deployed(self) -> Vec<String> {
        self.deployed
    }

    /// Deploy a bundle document and return its generated identifier.
    ///
    /// Every service is checked for a charm and a unit count before the
    /// controller is contacted. Services are deployed in document order,
    /// relations are added once every service has been deployed. Relations
    /// that do not have exactly two endpoints are skipped.
    pub async fn deploy_bundle(&mut self, raw_bundle: &str) -> Result<String> {
        let mut bundle = BundleParser::parse_str(raw_bundle)?;

        let service_names = bundle.list_services();
        for name in &service_names {
            bundle.charm_name(name)?;
            bundle.number_of_units(name)?;
        }
        for endpoint in bundle.dangling_endpoints() {
            warn!(
                "Relation endpoint ({}) does not name a service of the bundle",
                endpoint
            );
        }

        let bundle_id = self.unique_bundle_id().await?;
        info!(
            "Deploying bundle ({}) for user ({}) with {} service(s)",
            bundle_id,
            self.user_id,
            service_names.len()
        );

        for name in &service_names {
            bundle.rename_service(name, &service_id(&bundle_id, name))?;
        }

        self.session.add_bundle(BundleRecord::new(
            bundle_id.clone(),
            self.user_id.clone(),
            raw_bundle.to_string(),
        ));

        for service_name in bundle.list_services() {
            let charm_name = bundle.charm_name(&service_name)?;
            let num_units = bundle.number_of_units(&service_name)?;

            self.controller
                .deploy_service(&service_name, charm_name, num_units)
                .await?;
            self.deployed.push(service_name.clone());

            if bundle.is_exposed(&service_name) {
                self.controller.expose(&service_name).await?;
            }

            self.session.add_service(ServiceRecord::new(
                service_name,
                bundle_id.clone(),
                num_units,
            ));
        }

        for relation in bundle.relations() {
            match relation.as_slice() {
                [endpoint_a, endpoint_b] => {
                    self.controller.add_relation(endpoint_a, endpoint_b).await?;
                }
                _ => {
                    warn!(
                        "Skipping relation {:?} in bundle ({}): expected two endpoints",
                        relation, bundle_id
                    );
                }
            }
        }

        Ok(bundle_id)
    }

    /// Destroy every service of a bundle on the controller, then stage the
    /// deletion of its records. The first controller failure aborts the
    /// workflow and leaves the records in place.
    pub async fn destroy_bundle(&mut self, bundle_id: &str) -> Result<()> {
        let bundle = self.owned_bundle(bundle_id, "destroy").await?;
        let services = self.session.services_of(&bundle.bundle_id).await?;

        info!(
            "Destroying bundle ({}) with {} service(s)",
            bundle.bundle_id,
            services.len()
        );

        for service in &services {
            let machines = self
                .controller
                .machines_for_service(&service.service_id)
                .await?;
            self.controller.destroy_service(&service.service_id).await?;

            if !machines.is_empty() {
                self.controller.destroy_machines(&machines, true).await?;
            }
        }

        self.session.delete_bundle(&bundle.bundle_id);
        Ok(())
    }

    /// Aggregate the agent state of every unit of the bundle
    pub async fn bundle_status(&self, bundle_id: &str) -> Result<BundleStatus> {
        let bundle = self.owned_bundle(bundle_id, "read").await?;
        let services = self.session.services_of(&bundle.bundle_id).await?;
        let snapshot = self.controller.status().await?;

        let mut information = Vec::new();
        for service in &services {
            let status = snapshot.services.get(&service.service_id).ok_or_else(|| {
                Error::RemoteInconsistency(format!(
                    "Service ({}) of bundle ({}) is unknown to the controller",
                    service.service_id, bundle.bundle_id
                ))
            })?;

            for (unit_name, unit) in &status.units {
                if !unit.is_started() {
                    information.push(format!("{}: {}", unit_name, unit.agent_state));
                }
            }
        }

        if information.is_empty() {
            Ok(BundleStatus::started(bundle.bundle_id))
        } else {
            debug!(
                "Bundle ({}) has {} unit(s) not started",
                bundle.bundle_id,
                information.len()
            );
            Ok(BundleStatus::pending(bundle.bundle_id, information))
        }
    }

    /// Bundles owned by the user
    pub async fn list_bundles(&self) -> Result<Vec<String>> {
        self.session.user_bundles(&self.user_id).await
    }

    async fn owned_bundle(&self, bundle_id: &str, action: &str) -> Result<BundleRecord> {
        let bundle = self.session.find_bundle(bundle_id).await?;
        if !bundle.is_owned_by(&self.user_id) {
            warn!(
                "User ({}) is not allowed to {} bundle ({})",
                self.user_id, action, bundle_id
            );
            return Err(Error::Forbidden {
                user_id: self.user_id.clone(),
                bundle_id: bundle_id.to_string(),
            });
        }
        Ok(bundle)
    }

    async fn unique_bundle_id(&self) -> Result<String> {
        for _ in 0..MAX_ID_ATTEMPTS {
            let bundle_id = generate_bundle_id(&self.user_id);
            if !self.session.bundle_exists(&bundle_id).await? {
                return Ok(bundle_id);
            }
            warn!("Generated bundle id ({}) is already taken", bundle_id);
        }
        Err(Error::Storage(format!(
            "No free bundle id for user ({}) after {} attempts",
            self.user_id, MAX_ID_ATTEMPTS
        )))
    }
}
