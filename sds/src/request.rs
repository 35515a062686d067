//! Asynchronous reads.
//!
//! A request runs the read as a task on an executor the caller provides and hands the outcome to
//! a completion handler. Requests can't be cancelled once spawned.
//!
use futures::task::{Spawn, SpawnExt};
use tracing::trace;

use crate::{
    data::DataArray,
    dataset::DataSet,
    errors::Result,
    geom::Region,
    variable::VariableId,
};

impl DataSet {
    /// Read `region` of variable `id` on `spawner`, then call `handler` with the result.
    pub fn request_data<S, F>(
        &self,
        spawner: &S,
        id: VariableId,
        region: Region,
        handler: F,
    ) -> Result<()>
    where
        S: Spawn + ?Sized,
        F: FnOnce(Result<DataArray>) + Send + 'static,
    {
        let dataset = self.clone();
        spawner.spawn(async move {
            trace!(dataset = %dataset.id, variable = %id, "serving data request");
            handler(dataset.read(id, &region, false));
        })?;

        Ok(())
    }

    /// Read several regions in one task. The handler gets every result in request order, or the
    /// first error.
    ///
    pub fn request_multiple_data<S, F>(
        &self,
        spawner: &S,
        requests: Vec<(VariableId, Region)>,
        handler: F,
    ) -> Result<()>
    where
        S: Spawn + ?Sized,
        F: FnOnce(Result<Vec<DataArray>>) + Send + 'static,
    {
        let dataset = self.clone();
        spawner.spawn(async move {
            trace!(dataset = %dataset.id, requests = requests.len(), "serving data requests");
            let results = requests
                .iter()
                .map(|(id, region)| dataset.read(*id, region, false))
                .collect();
            handler(results);
        })?;

        Ok(())
    }
}
