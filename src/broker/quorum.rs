//! Quorum policies.
//!
//! The write side replicates an offer to every known replica in
//! parallel and counts acks; the caller decides success against W. The
//! read side collects every replica's full log and reconstructs the
//! authoritative history as the first pair of responders whose offer
//! sets agree exactly (compared by `offer_id` membership, order
//! independent, length equal). Responders are scanned in replica-id
//! order, so the result is deterministic for a given set of replies.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;

use crate::rpc::{Request, Response, RpcClient};
use crate::types::Offer;

/// Fan one offer out to every replica in parallel.
///
/// Returns, per replica, whether the insert was acked: the call
/// returned within the deadline and replied ok. Transport failures and
/// rejections both count as negative acks.
pub async fn replicate(
    peers: &[(String, Arc<RpcClient>)],
    offer: &Offer,
    deadline: Duration,
) -> Vec<(String, bool)> {
    let calls = peers.iter().map(|(id, client)| {
        let id = id.clone();
        let client = client.clone();
        let request = Request::ReplicaInsert(offer.clone());
        async move {
            let acked = matches!(
                client.call(&request, deadline).await,
                Ok(Response::Offer { ok: true })
            );
            (id, acked)
        }
    });
    join_all(calls).await
}

/// Read every replica's full log in parallel.
///
/// `None` marks a replica that failed or rejected the read.
pub async fn read_all(
    peers: &[(String, Arc<RpcClient>)],
    deadline: Duration,
) -> Vec<(String, Option<Vec<Offer>>)> {
    let calls = peers.iter().map(|(id, client)| {
        let id = id.clone();
        let client = client.clone();
        async move {
            let offers = match client.call(&Request::ReplicaRead, deadline).await {
                Ok(Response::Read { offers, ok: true }) => Some(offers),
                _ => None,
            };
            (id, offers)
        }
    });
    join_all(calls).await
}

/// Two logs hold the same offer set: equal length and id-bijection.
pub fn same_offer_set(a: &[Offer], b: &[Offer]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let ids: HashSet<&str> = b.iter().map(|o| o.offer_id.as_str()).collect();
    a.iter().all(|o| ids.contains(o.offer_id.as_str()))
}

/// Find the authoritative history among the responders.
///
/// The first pair (i, j), i < j, with identical offer sets wins; the
/// caller passes responders in replica-id order to keep the scan
/// deterministic. Returns the agreeing list, or `None` when no two
/// responders agree.
pub fn find_agreement(responders: &[(String, Vec<Offer>)]) -> Option<&[Offer]> {
    for i in 0..responders.len() {
        for j in (i + 1)..responders.len() {
            if same_offer_set(&responders[i].1, &responders[j].1) {
                tracing::info!(
                    first = %responders[i].0,
                    second = %responders[j].0,
                    offers = responders[i].1.len(),
                    "replicas agree on offer history"
                );
                return Some(&responders[i].1);
            }
        }
    }
    None
}

/// Offers of the authoritative history absent from the caller's snapshot.
pub fn missing_from(authoritative: &[Offer], current: &[Offer]) -> Vec<Offer> {
    let have: HashSet<&str> = current.iter().map(|o| o.offer_id.as_str()).collect();
    authoritative
        .iter()
        .filter(|o| !have.contains(o.offer_id.as_str()))
        .cloned()
        .collect()
}
