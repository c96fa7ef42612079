//! Test support utilities shared across unit and integration tests.

use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::bootstrap::{Bootstrap, BootstrapConfig, BootstrapError, BootstrapFuture, BootstrapTarget};
use crate::provider::{
    AddressRecord, Addresses, CloudProvider, Flavor, FloatingIp, Image, Instance, InstanceStatus,
    ProviderError, ProviderFuture, ServerSpec,
};

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// In-memory provider with scripted catalogs, statuses, and failures.
///
/// Used to drive deterministic provisioning runs without a compute API.
#[derive(Debug, Default)]
pub struct FakeProvider {
    flavors: Vec<Flavor>,
    images: Vec<Image>,
    floating_ips: Vec<FloatingIp>,
    addresses: Addresses,
    admin_password: Option<String>,
    create_error: Option<ProviderError>,
    associate_error: Option<ProviderError>,
    statuses: Vec<InstanceStatus>,
    status_cursor: AtomicUsize,
    image_list_calls: AtomicUsize,
    floating_list_calls: AtomicUsize,
    created: Mutex<Option<ServerSpec>>,
    associations: Mutex<Vec<(String, String)>>,
}

impl FakeProvider {
    /// Creates an empty provider; every query succeeds with empty results.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the flavor catalog.
    #[must_use]
    pub fn with_flavors(mut self, flavors: Vec<Flavor>) -> Self {
        self.flavors = flavors;
        self
    }

    /// Seeds the image catalog.
    #[must_use]
    pub fn with_images(mut self, images: Vec<Image>) -> Self {
        self.images = images;
        self
    }

    /// Seeds the allocated floating IP list.
    #[must_use]
    pub fn with_floating_ips(mut self, floating_ips: Vec<FloatingIp>) -> Self {
        self.floating_ips = floating_ips;
        self
    }

    /// Seeds the addresses reported for the instance once active.
    #[must_use]
    pub fn with_addresses(mut self, addresses: Addresses) -> Self {
        self.addresses = addresses;
        self
    }

    /// Seeds the generated admin password returned with the instance.
    #[must_use]
    pub fn with_admin_password(mut self, password: impl Into<String>) -> Self {
        self.admin_password = Some(password.into());
        self
    }

    /// Makes every create call fail with `error`.
    #[must_use]
    pub fn with_create_error(mut self, error: ProviderError) -> Self {
        self.create_error = Some(error);
        self
    }

    /// Makes every association call fail with `error`.
    #[must_use]
    pub fn with_associate_error(mut self, error: ProviderError) -> Self {
        self.associate_error = Some(error);
        self
    }

    /// Scripts the statuses returned by successive `get_server` calls; the
    /// final entry repeats once the script is exhausted.
    #[must_use]
    pub fn with_status_sequence(mut self, statuses: Vec<InstanceStatus>) -> Self {
        self.statuses = statuses;
        self
    }

    /// Returns the spec captured by the last create call, if any.
    #[must_use]
    pub fn created_spec(&self) -> Option<ServerSpec> {
        lock(&self.created).clone()
    }

    /// Returns all `(server_id, address)` association calls in order.
    #[must_use]
    pub fn associations(&self) -> Vec<(String, String)> {
        lock(&self.associations).clone()
    }

    /// Number of image catalog queries made so far.
    #[must_use]
    pub fn image_list_calls(&self) -> usize {
        self.image_list_calls.load(Ordering::SeqCst)
    }

    /// Number of floating IP list queries made so far.
    #[must_use]
    pub fn floating_list_calls(&self) -> usize {
        self.floating_list_calls.load(Ordering::SeqCst)
    }

    fn next_status(&self) -> InstanceStatus {
        if self.statuses.is_empty() {
            return InstanceStatus::Active;
        }
        let cursor = self.status_cursor.fetch_add(1, Ordering::SeqCst);
        let index = cursor.min(self.statuses.len() - 1);
        self.statuses.get(index).copied().unwrap_or(InstanceStatus::Active)
    }

    fn instance(&self, id: &str, status: InstanceStatus, addresses: Addresses) -> Instance {
        let created = lock(&self.created);
        Instance {
            id: id.to_owned(),
            name: created
                .as_ref()
                .map_or_else(|| "os-node".to_owned(), |spec| spec.name.clone()),
            status,
            flavor_id: created
                .as_ref()
                .map(|spec| spec.flavor_ref.clone())
                .unwrap_or_default(),
            image_id: created
                .as_ref()
                .map(|spec| spec.image_ref.clone())
                .unwrap_or_default(),
            addresses,
            password: self.admin_password.clone(),
            key_name: created.as_ref().and_then(|spec| spec.key_name.clone()),
        }
    }
}

impl CloudProvider for FakeProvider {
    fn create_server<'a>(&'a self, spec: &'a ServerSpec) -> ProviderFuture<'a, Instance> {
        Box::pin(async move {
            if let Some(error) = &self.create_error {
                return Err(error.clone());
            }
            *lock(&self.created) = Some(spec.clone());
            Ok(self.instance("srv-1", InstanceStatus::Building, Addresses::new()))
        })
    }

    fn get_server<'a>(&'a self, id: &'a str) -> ProviderFuture<'a, Instance> {
        Box::pin(async move {
            let status = self.next_status();
            let addresses = if status == InstanceStatus::Active {
                self.addresses.clone()
            } else {
                Addresses::new()
            };
            Ok(self.instance(id, status, addresses))
        })
    }

    fn list_flavors(&self) -> ProviderFuture<'_, Vec<Flavor>> {
        Box::pin(async move { Ok(self.flavors.clone()) })
    }

    fn list_images(&self) -> ProviderFuture<'_, Vec<Image>> {
        Box::pin(async move {
            self.image_list_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.images.clone())
        })
    }

    fn list_floating_ips(&self) -> ProviderFuture<'_, Vec<FloatingIp>> {
        Box::pin(async move {
            self.floating_list_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.floating_ips.clone())
        })
    }

    fn associate_floating_ip<'a>(
        &'a self,
        server_id: &'a str,
        address: &'a str,
    ) -> ProviderFuture<'a, ()> {
        Box::pin(async move {
            if let Some(error) = &self.associate_error {
                return Err(error.clone());
            }
            lock(&self.associations).push((server_id.to_owned(), address.to_owned()));
            Ok(())
        })
    }
}

/// Builds a provider seeded with a small catalog and a public address, the
/// baseline most provisioning scenarios start from.
#[must_use]
pub fn catalog_provider() -> FakeProvider {
    FakeProvider::new()
        .with_flavors(vec![
            Flavor {
                id: "1".to_owned(),
                name: "m1.small".to_owned(),
            },
            Flavor {
                id: "2".to_owned(),
                name: "m1.medium".to_owned(),
            },
        ])
        .with_images(vec![
            Image {
                id: "img-9".to_owned(),
                name: "ubuntu-24.04".to_owned(),
            },
            Image {
                id: "img-10".to_owned(),
                name: "fedora-41".to_owned(),
            },
        ])
        .with_addresses(Addresses::from_pairs(vec![(
            "public".to_owned(),
            vec![AddressRecord::fixed_v4("192.0.2.10")],
        )]))
}

/// Bootstrap double that records invocations and yields a scripted outcome
/// without probing any network endpoint.
#[derive(Debug)]
pub struct ScriptedBootstrap {
    outcome: Result<i32, BootstrapError>,
    invocations: Mutex<Vec<(BootstrapTarget, BootstrapConfig)>>,
}

impl ScriptedBootstrap {
    /// Bootstrap that reports exit status zero.
    #[must_use]
    pub fn succeeding() -> Self {
        Self::with_exit_code(0)
    }

    /// Bootstrap that reports the given exit status.
    #[must_use]
    pub fn with_exit_code(code: i32) -> Self {
        Self {
            outcome: Ok(code),
            invocations: Mutex::new(Vec::new()),
        }
    }

    /// Bootstrap that fails with the given error.
    #[must_use]
    pub fn failing(error: BootstrapError) -> Self {
        Self {
            outcome: Err(error),
            invocations: Mutex::new(Vec::new()),
        }
    }

    /// Returns all `(target, config)` pairs handed to the bootstrap so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<(BootstrapTarget, BootstrapConfig)> {
        lock(&self.invocations).clone()
    }
}

impl Bootstrap for ScriptedBootstrap {
    fn run<'a>(
        &'a self,
        target: &'a BootstrapTarget,
        config: &'a BootstrapConfig,
    ) -> BootstrapFuture<'a, i32> {
        Box::pin(async move {
            lock(&self.invocations).push((target.clone(), config.clone()));
            self.outcome.clone()
        })
    }
}
