//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::Instant;

use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use tracing::warn;
use zebra_utils::ip::IpNetworkExt;
use zebra_utils::southbound::{RouteKeyMsg, RouteMsg, RouteSink, RouteType};

use crate::af::AfiSafi;
use crate::config::InstanceCfg;
use crate::debug::{Debug, RouteFilterReason};
use crate::error::Error;
use crate::neighbor::{Neighbor, Neighbors, PeerType, fsm};
use crate::packet::attribute::{
    Aggregator, Attrs, Comm, DEFAULT_LOCAL_PREF, MpNexthop,
};
use crate::packet::consts::{Afi, Origin};
use crate::policy::{FilterDirection, PolicyCfg};
use crate::store::{AttrStore, RouteAttrs};

// Weight of locally originated routes.
pub const DFLT_LOCAL_WEIGHT: u32 = 32768;

#[derive(Debug, Default)]
pub struct Rib {
    pub store: AttrStore,
    pub tables: RoutingTables,
    next_seq: u64,
}

#[derive(Debug, Default)]
pub struct RoutingTables {
    pub ipv4_unicast: RoutingTable,
    pub ipv4_multicast: RoutingTable,
    pub ipv6_unicast: RoutingTable,
    pub ipv6_multicast: RoutingTable,
}

#[derive(Debug, Default)]
pub struct RoutingTable {
    pub prefixes: BTreeMap<IpNetwork, Destination>,
    pub aggregates: BTreeMap<IpNetwork, Aggregate>,
    // Prefixes pending a run of the decision process, along with the route
    // that was removed from them (if any).
    pub queued_prefixes: BTreeMap<IpNetwork, Option<Route>>,
}

#[derive(Debug, Default)]
pub struct Destination {
    pub routes: Vec<Route>,
    pub adj_rib: BTreeMap<IpAddr, AdjRib>,
}

#[derive(Debug, Default)]
pub struct AdjRib {
    pub in_: Option<RouteAttrs>,
    pub out: Option<RouteAttrs>,
}

#[derive(Clone, Debug)]
pub struct Route {
    pub origin: RouteOrigin,
    pub route_type: RouteType,
    pub sub_type: RouteSubType,
    pub attrs: RouteAttrs,
    pub selected: bool,
    pub suppress: u32,
    pub last_modified: Instant,
    pub seq: u64,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum RouteOrigin {
    // Route originated by this speaker (static, aggregate or
    // redistributed).
    Local,
    // Route learned from a neighbor.
    Neighbor {
        remote_addr: IpAddr,
        identifier: Ipv4Addr,
        peer_type: PeerType,
    },
}

#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum RouteSubType {
    Normal,
    Static,
    Aggregate,
    Redistribute,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Aggregate {
    pub summary_only: bool,
    pub as_set: bool,
    pub count: u32,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RouteRejectReason {
    ConnectedType,
    StaticType,
    AggregateSubType,
    StaticSubType,
    WeightLower,
    LocalPrefLower,
    AsPathLonger,
    OriginTypeHigher,
    MedHigher,
    PreferExternal,
    HigherRouterId,
    LaterArrival,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RouteCompare {
    Preferred(RouteRejectReason),
    LessPreferred(RouteRejectReason),
}

// State outside the RIB that route processing reads or updates.
pub struct RibCxt<'a> {
    pub config: &'a InstanceCfg,
    pub policy: &'a PolicyCfg,
    pub neighbors: &'a mut Neighbors,
    pub sink: &'a mut dyn RouteSink,
}

// ===== impl Rib =====

impl Rib {
    // Processes a route received from a neighbor.
    //
    // Returns an error when the neighbor's maximum prefix count is exceeded,
    // in which case the route is stored but not processed.
    pub fn update(
        &mut self,
        cxt: &mut RibCxt<'_>,
        remote_addr: IpAddr,
        afi_safi: AfiSafi,
        prefix: IpNetwork,
        mut attrs: Attrs,
    ) -> Result<(), Error> {
        let Some(nbr) = cxt.neighbors.get_mut(&remote_addr) else {
            return Ok(());
        };

        // Record the received attributes for soft reconfiguration.
        if nbr.config.soft_reconfiguration {
            let table = self.tables.get_mut(afi_safi);
            let dest = table.prefixes.entry(prefix).or_default();
            let adj_rib = dest.adj_rib.entry(remote_addr).or_default();
            let handle = self.store.intern(&attrs);
            if let Some(old) = adj_rib.in_.replace(handle) {
                self.store.release(&old);
            }
        }

        // Routes whose AS_PATH contains our own AS are ignored.
        if attrs.base.invalid {
            let reason = RouteFilterReason::AsPathLoop;
            Debug::NbrRouteFiltered(&remote_addr, &prefix, reason).log();
            return Ok(());
        }

        // Route reflection cluster loop check.
        if let Some(cluster_list) = &attrs.cluster_list
            && cluster_list.loop_check(cxt.config.cluster_id())
        {
            let reason = RouteFilterReason::ClusterLoop;
            Debug::NbrRouteFiltered(&remote_addr, &prefix, reason).log();
            return Ok(());
        }

        // Input distribute-list, prefix-list and filter-list.
        if !cxt.policy.neighbor_filter(
            &nbr.config,
            FilterDirection::In,
            &prefix,
            &attrs,
        ) {
            let reason = RouteFilterReason::InputFilter;
            Debug::NbrRouteFiltered(&remote_addr, &prefix, reason).log();
            return Ok(());
        }

        // Neighbor weight and input route-map.
        attrs.base.weight = nbr.config.weight;
        if let Some(name) = &nbr.config.route_map_in
            && !cxt.policy.route_map_apply(name, &prefix, &mut attrs)
        {
            let reason = RouteFilterReason::RouteMapIn;
            Debug::NbrRouteFiltered(&remote_addr, &prefix, reason).log();
            return Ok(());
        }

        let origin = RouteOrigin::Neighbor {
            remote_addr,
            identifier: nbr.identifier.unwrap_or(Ipv4Addr::UNSPECIFIED),
            peer_type: nbr.peer_type,
        };

        // Replace the previous route from the same neighbor (implicit
        // withdraw), or account for a new prefix.
        match self.route_remove(
            afi_safi,
            prefix,
            origin,
            RouteType::Bgp,
            RouteSubType::Normal,
        ) {
            Some(old) => self.store.release(&old.attrs),
            None => *nbr.prefix_count.entry(afi_safi).or_default() += 1,
        }
        let prefix_count = nbr.prefix_count.get(&afi_safi).copied();
        let max_prefix = nbr.config.max_prefix;

        // Add the new route.
        let attrs = self.store.intern(&attrs);
        let route = Route::new(
            origin,
            RouteType::Bgp,
            RouteSubType::Normal,
            attrs,
            self.next_seq(),
        );
        self.route_add(afi_safi, prefix, route, cxt.config);

        // Maximum prefix check.
        if let Some(max_prefix) = max_prefix
            && max_prefix > 0
            && prefix_count.unwrap_or(0) >= max_prefix
        {
            return Err(Error::NbrMaxPrefixExceeded(
                remote_addr,
                afi_safi,
                max_prefix,
            ));
        }

        self.process_queued(cxt);
        Ok(())
    }

    // Processes a route withdrawn by a neighbor.
    pub fn withdraw(
        &mut self,
        cxt: &mut RibCxt<'_>,
        remote_addr: IpAddr,
        afi_safi: AfiSafi,
        prefix: IpNetwork,
    ) {
        let Some(nbr) = cxt.neighbors.get_mut(&remote_addr) else {
            return;
        };

        // Soft reconfiguration.
        if nbr.config.soft_reconfiguration {
            let table = self.tables.get_mut(afi_safi);
            if let Some(dest) = table.prefixes.get_mut(&prefix) {
                adj_in_unset(&mut self.store, &mut dest.adj_rib, &remote_addr);
            }
        }

        let origin = RouteOrigin::Neighbor {
            remote_addr,
            identifier: nbr.identifier.unwrap_or(Ipv4Addr::UNSPECIFIED),
            peer_type: nbr.peer_type,
        };
        let Some(route) = self.route_remove(
            afi_safi,
            prefix,
            origin,
            RouteType::Bgp,
            RouteSubType::Normal,
        ) else {
            Debug::NbrRouteNotFound(&remote_addr, &prefix).log();
            return;
        };
        if let Some(count) = nbr.prefix_count.get_mut(&afi_safi) {
            *count = count.saturating_sub(1);
        }

        self.process_queued(cxt);
        self.store.release(&route.attrs);
    }

    // Re-applies the inbound policy to the routes stored in the neighbor's
    // Adj-RIB-In.
    pub fn soft_reconfig_in(
        &mut self,
        cxt: &mut RibCxt<'_>,
        remote_addr: IpAddr,
        afi_safi: AfiSafi,
    ) -> Result<(), Error> {
        let routes = self
            .tables
            .get(afi_safi)
            .prefixes
            .iter()
            .filter_map(|(prefix, dest)| {
                let attrs = dest.adj_rib.get(&remote_addr)?.in_.as_ref()?;
                Some((*prefix, attrs.value.get()))
            })
            .collect::<Vec<_>>();

        for (prefix, attrs) in routes {
            // A route rejected by the new policy replaces nothing, so the
            // previously accepted one must go first.
            self.withdraw_quiet(cxt, remote_addr, afi_safi, prefix);
            self.update(cxt, remote_addr, afi_safi, prefix, attrs)?;
        }
        self.process_queued(cxt);

        Ok(())
    }

    // Removes a neighbor's route without touching its Adj-RIB-In.
    fn withdraw_quiet(
        &mut self,
        cxt: &mut RibCxt<'_>,
        remote_addr: IpAddr,
        afi_safi: AfiSafi,
        prefix: IpNetwork,
    ) {
        let Some(nbr) = cxt.neighbors.get_mut(&remote_addr) else {
            return;
        };
        let origin = RouteOrigin::Neighbor {
            remote_addr,
            identifier: nbr.identifier.unwrap_or(Ipv4Addr::UNSPECIFIED),
            peer_type: nbr.peer_type,
        };
        if let Some(route) = self.route_remove(
            afi_safi,
            prefix,
            origin,
            RouteType::Bgp,
            RouteSubType::Normal,
        ) {
            if let Some(count) = nbr.prefix_count.get_mut(&afi_safi) {
                *count = count.saturating_sub(1);
            }
            self.store.release(&route.attrs);
        }
    }

    // Removes every route learned from the given neighbor, along with its
    // Adj-RIB-In and Adj-RIB-Out entries.
    //
    // Affected prefixes are queued for the decision process, which runs on
    // the next call to `process_queued`.
    pub fn clear_peer(&mut self, nbr: &mut Neighbor) {
        let remote_addr = nbr.remote_addr;
        for afi_safi in AfiSafi::all() {
            let prefixes = self
                .tables
                .get(afi_safi)
                .prefixes
                .iter()
                .filter(|(_, dest)| {
                    dest.adj_rib.contains_key(&remote_addr)
                        || dest.routes.iter().any(|route| {
                            route.origin.remote_addr() == Some(remote_addr)
                        })
                })
                .map(|(prefix, _)| *prefix)
                .collect::<Vec<_>>();

            for prefix in prefixes {
                // Release Adj-RIB-In and Adj-RIB-Out entries.
                let table = self.tables.get_mut(afi_safi);
                if let Some(dest) = table.prefixes.get_mut(&prefix)
                    && let Some(adj_rib) = dest.adj_rib.remove(&remote_addr)
                {
                    for attrs in [adj_rib.in_, adj_rib.out].iter().flatten() {
                        self.store.release(attrs);
                    }
                }

                // Remove routes.
                while let Some(route) =
                    self.route_remove_by(afi_safi, prefix, |route| {
                        route.origin.remote_addr() == Some(remote_addr)
                    })
                {
                    self.store.release(&route.attrs);
                }
                self.tables.get_mut(afi_safi).queue(prefix, None);
            }
        }
        nbr.prefix_count.clear();
    }

    // Sends the contents of the routing table to a neighbor that has just
    // become established or asked for a route refresh.
    //
    // Route-server clients receive every candidate route, other neighbors
    // only the selected ones.
    pub fn announce_table(
        &mut self,
        cxt: &mut RibCxt<'_>,
        remote_addr: IpAddr,
        afi_safi: AfiSafi,
    ) {
        let clients = reflector_clients(cxt.neighbors);
        let Some(nbr) = cxt.neighbors.get_mut(&remote_addr) else {
            return;
        };
        let rs_client = nbr.config.route_server_client;
        let Rib { store, tables, .. } = self;
        let table = tables.get_mut(afi_safi);

        for (prefix, dest) in table.prefixes.iter_mut() {
            for route in &dest.routes {
                if !rs_client && !route.selected {
                    continue;
                }
                let from_client = route
                    .origin
                    .remote_addr()
                    .is_some_and(|addr| clients.contains(&addr));
                let Some(attrs) = announce_check(
                    route,
                    prefix,
                    afi_safi,
                    nbr,
                    from_client,
                    cxt.config,
                    cxt.policy,
                ) else {
                    continue;
                };

                if !rs_client {
                    let adj_rib = dest.adj_rib.entry(remote_addr).or_default();
                    adj_out_set(store, adj_rib, &attrs);
                }
                let queue = nbr.update_queues.get_mut(afi_safi);
                queue.reach_add(*prefix, attrs);
            }
        }
    }

    // Runs the decision process for every queued prefix.
    pub fn process_queued(&mut self, cxt: &mut RibCxt<'_>) {
        for afi_safi in AfiSafi::all() {
            let table = self.tables.get_mut(afi_safi);
            let queued = std::mem::take(&mut table.queued_prefixes);
            for (prefix, deleted) in queued {
                self.process(cxt, afi_safi, prefix, deleted.as_ref());
            }
        }
    }

    // Selects the best route for a prefix, announces the change to every
    // established neighbor and updates the route installation sink.
    //
    // `deleted` is the route that was just removed from the prefix, if any.
    pub fn process(
        &mut self,
        cxt: &mut RibCxt<'_>,
        afi_safi: AfiSafi,
        prefix: IpNetwork,
        deleted: Option<&Route>,
    ) {
        let clients = reflector_clients(cxt.neighbors);
        let Rib { store, tables, .. } = self;
        let table = tables.get_mut(afi_safi);
        let dest = table.prefixes.entry(prefix).or_default();

        // Best path selection.
        let old_select = dest.routes.iter().position(|route| route.selected);
        let new_select = best_path(&dest.routes, cxt.config);
        if old_select.is_some() && old_select == new_select {
            return;
        }
        if let Some(idx) = old_select {
            dest.routes[idx].selected = false;
        }
        match new_select {
            Some(idx) => {
                let route = &mut dest.routes[idx];
                route.selected = true;
                Debug::BestPathFound(&prefix, route).log();
            }
            None => {
                Debug::BestPathNotFound(&prefix).log();
            }
        }

        // Announce the change to the neighbors.
        let new_route = new_select.map(|idx| &dest.routes[idx]);
        let from_client = new_route
            .and_then(|route| route.origin.remote_addr())
            .is_some_and(|addr| clients.contains(&addr));
        for nbr in cxt.neighbors.values_mut() {
            if nbr.state != fsm::State::Established
                || !nbr.families_nego.contains(&afi_safi)
                || nbr.config.route_server_client
            {
                continue;
            }

            let attrs = new_route.and_then(|route| {
                announce_check(
                    route,
                    &prefix,
                    afi_safi,
                    nbr,
                    from_client,
                    cxt.config,
                    cxt.policy,
                )
            });
            let queue = nbr.update_queues.get_mut(afi_safi);
            match attrs {
                Some(attrs) => {
                    let adj_rib =
                        dest.adj_rib.entry(nbr.remote_addr).or_default();
                    adj_out_set(store, adj_rib, &attrs);
                    queue.reach_add(prefix, attrs);
                }
                None => {
                    if adj_out_unset(store, &mut dest.adj_rib, &nbr.remote_addr)
                    {
                        queue.unreach_add(prefix);
                    }
                }
            }
        }

        // Update the route installation sink.
        if afi_safi.is_unicast() {
            match new_route {
                Some(route) if route.is_fib_route() => {
                    let key = route_key(&prefix, route);
                    cxt.sink.send(RouteMsg::Install(key));
                }
                _ => {
                    let old_route = match old_select {
                        Some(idx) => Some(&dest.routes[idx]),
                        None => deleted.filter(|route| route.selected),
                    };
                    if let Some(route) = old_route
                        && route.is_fib_route()
                    {
                        let key = route_key(&prefix, route);
                        cxt.sink.send(RouteMsg::Uninstall(key));
                    }
                }
            }
        }

        // Remove routing table entries that no longer hold any data.
        if dest.routes.is_empty() && dest.adj_rib.is_empty() {
            table.prefixes.remove(&prefix);
        }
    }

    // Adds a locally originated network.
    pub fn static_add(
        &mut self,
        cxt: &mut RibCxt<'_>,
        afi_safi: AfiSafi,
        prefix: IpNetwork,
        route_map: Option<&str>,
    ) {
        let mut attrs = Attrs::local(Origin::Igp, DFLT_LOCAL_WEIGHT);
        if let Some(name) = route_map
            && !cxt.policy.route_map_apply(name, &prefix, &mut attrs)
        {
            Debug::LocalRouteFiltered(&prefix, name).log();
            return;
        }

        self.local_route_replace(
            afi_safi,
            prefix,
            RouteType::Bgp,
            RouteSubType::Static,
            &attrs,
            cxt.config,
        );
        self.process_queued(cxt);
    }

    // Removes a locally originated network.
    pub fn static_delete(
        &mut self,
        cxt: &mut RibCxt<'_>,
        afi_safi: AfiSafi,
        prefix: IpNetwork,
    ) {
        if let Some(route) = self.route_remove(
            afi_safi,
            prefix,
            RouteOrigin::Local,
            RouteType::Bgp,
            RouteSubType::Static,
        ) {
            self.process_queued(cxt);
            self.store.release(&route.attrs);
        }
    }

    // Configures an aggregate address.
    //
    // The aggregate route is originated as long as at least one more
    // specific route exists.
    pub fn aggregate_add(
        &mut self,
        cxt: &mut RibCxt<'_>,
        afi_safi: AfiSafi,
        prefix: IpNetwork,
        summary_only: bool,
        as_set: bool,
    ) {
        let table = self.tables.get_mut(afi_safi);
        if table.aggregates.contains_key(&prefix) {
            return;
        }
        if as_set {
            warn!(%prefix, "AS_SET aggregation isn't supported");
        }

        // Count the more specific routes, suppressing them if requested.
        let mut count = 0;
        let mut suppressed = vec![];
        for (child, dest) in table
            .prefixes
            .iter_mut()
            .filter(|(child, _)| prefix.is_strict_supernet_of(child))
        {
            let mut matched = false;
            for route in dest
                .routes
                .iter_mut()
                .filter(|route| route.sub_type != RouteSubType::Aggregate)
            {
                if summary_only {
                    route.suppress += 1;
                    matched = true;
                }
                count += 1;
            }
            if matched {
                suppressed.push(*child);
            }
        }
        for child in suppressed {
            table.queue(child, None);
        }
        table.aggregates.insert(
            prefix,
            Aggregate {
                summary_only,
                as_set,
                count,
            },
        );

        // Originate the aggregate route.
        if count > 0 {
            self.aggregate_route_add(afi_safi, prefix, cxt.config);
        }
        self.process_queued(cxt);
    }

    // Removes an aggregate address, restoring the routes it suppressed.
    pub fn aggregate_delete(
        &mut self,
        cxt: &mut RibCxt<'_>,
        afi_safi: AfiSafi,
        prefix: IpNetwork,
    ) {
        let table = self.tables.get_mut(afi_safi);
        let Some(aggregate) = table.aggregates.remove(&prefix) else {
            return;
        };

        if aggregate.summary_only {
            let mut unsuppressed = vec![];
            for (child, dest) in table
                .prefixes
                .iter_mut()
                .filter(|(child, _)| prefix.is_strict_supernet_of(child))
            {
                let mut matched = false;
                for route in dest
                    .routes
                    .iter_mut()
                    .filter(|route| route.sub_type != RouteSubType::Aggregate)
                {
                    route.suppress = route.suppress.saturating_sub(1);
                    if route.suppress == 0 {
                        matched = true;
                    }
                }
                if matched {
                    unsuppressed.push(*child);
                }
            }
            for child in unsuppressed {
                table.queue(child, None);
            }
        }

        self.aggregate_route_delete(afi_safi, prefix);
        self.process_queued(cxt);
    }

    // Adds a route learned from another routing source.
    //
    // Routes of types that aren't configured for redistribution are
    // ignored.
    pub fn redistribute_add(
        &mut self,
        cxt: &mut RibCxt<'_>,
        prefix: IpNetwork,
        nexthop: Option<IpAddr>,
        route_type: RouteType,
    ) {
        let Some(redist_cfg) = cxt.config.redistribute_cfg(route_type) else {
            return;
        };
        let afi_safi = AfiSafi::from_prefix(&prefix, false);

        let mut attrs = Attrs::local(Origin::Incomplete, DFLT_LOCAL_WEIGHT);
        match nexthop {
            Some(IpAddr::V4(nexthop)) => {
                attrs.base.nexthop = Some(nexthop);
            }
            Some(IpAddr::V6(nexthop)) => {
                attrs.base.mp_nexthop = Some(MpNexthop::Ipv6(nexthop));
            }
            None => (),
        }
        if let Some(name) = &redist_cfg.route_map
            && !cxt.policy.route_map_apply(name, &prefix, &mut attrs)
        {
            Debug::LocalRouteFiltered(&prefix, name).log();
            return;
        }

        self.local_route_replace(
            afi_safi,
            prefix,
            route_type,
            RouteSubType::Redistribute,
            &attrs,
            cxt.config,
        );
        self.process_queued(cxt);
    }

    // Removes a route learned from another routing source.
    pub fn redistribute_delete(
        &mut self,
        cxt: &mut RibCxt<'_>,
        prefix: IpNetwork,
        route_type: RouteType,
    ) {
        if cxt.config.redistribute_cfg(route_type).is_none() {
            return;
        }
        let afi_safi = AfiSafi::from_prefix(&prefix, false);

        if let Some(route) = self.route_remove(
            afi_safi,
            prefix,
            RouteOrigin::Local,
            route_type,
            RouteSubType::Redistribute,
        ) {
            self.process_queued(cxt);
            self.store.release(&route.attrs);
        }
    }

    // Removes every route learned from the given routing source.
    pub fn redistribute_withdraw_all(
        &mut self,
        cxt: &mut RibCxt<'_>,
        route_type: RouteType,
    ) {
        let mut removed = vec![];
        for afi_safi in [AfiSafi::Ipv4Unicast, AfiSafi::Ipv6Unicast] {
            let prefixes = self
                .tables
                .get(afi_safi)
                .prefixes
                .iter()
                .filter(|(_, dest)| {
                    dest.routes.iter().any(|route| {
                        route.origin == RouteOrigin::Local
                            && route.route_type == route_type
                            && route.sub_type == RouteSubType::Redistribute
                    })
                })
                .map(|(prefix, _)| *prefix)
                .collect::<Vec<_>>();
            for prefix in prefixes {
                removed.extend(self.route_remove(
                    afi_safi,
                    prefix,
                    RouteOrigin::Local,
                    route_type,
                    RouteSubType::Redistribute,
                ));
            }
        }

        self.process_queued(cxt);
        for route in removed {
            self.store.release(&route.attrs);
        }
    }

    // Uninstalls every installed route.
    pub fn terminate(&mut self, sink: &mut dyn RouteSink) {
        for afi_safi in [AfiSafi::Ipv4Unicast, AfiSafi::Ipv6Unicast] {
            let table = self.tables.get(afi_safi);
            for (prefix, dest) in &table.prefixes {
                if let Some(route) = dest
                    .routes
                    .iter()
                    .find(|route| route.selected && route.is_fib_route())
                {
                    sink.send(RouteMsg::Uninstall(route_key(prefix, route)));
                }
            }
        }
    }

    fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    // Inserts a route, accounting for the covering aggregates.
    fn route_add(
        &mut self,
        afi_safi: AfiSafi,
        prefix: IpNetwork,
        mut route: Route,
        config: &InstanceCfg,
    ) {
        if route.sub_type != RouteSubType::Aggregate {
            self.aggregate_increment(afi_safi, prefix, &mut route, config);
        }
        let table = self.tables.get_mut(afi_safi);
        table.prefixes.entry(prefix).or_default().routes.push(route);
        table.queue(prefix, None);
    }

    // Removes the route with the given key, accounting for the covering
    // aggregates.
    //
    // The caller is responsible for releasing the attributes of the removed
    // route.
    fn route_remove(
        &mut self,
        afi_safi: AfiSafi,
        prefix: IpNetwork,
        origin: RouteOrigin,
        route_type: RouteType,
        sub_type: RouteSubType,
    ) -> Option<Route> {
        self.route_remove_by(afi_safi, prefix, |route| {
            route.origin.remote_addr() == origin.remote_addr()
                && route.route_type == route_type
                && route.sub_type == sub_type
        })
    }

    fn route_remove_by(
        &mut self,
        afi_safi: AfiSafi,
        prefix: IpNetwork,
        f: impl Fn(&Route) -> bool,
    ) -> Option<Route> {
        let table = self.tables.get_mut(afi_safi);
        let dest = table.prefixes.get_mut(&prefix)?;
        let idx = dest.routes.iter().position(f)?;
        let mut route = dest.routes.remove(idx);
        table.queue(prefix, Some(route.clone()));
        if route.sub_type != RouteSubType::Aggregate {
            self.aggregate_decrement(afi_safi, prefix, &mut route);
        }
        Some(route)
    }

    // Adds or replaces a locally originated route.
    fn local_route_replace(
        &mut self,
        afi_safi: AfiSafi,
        prefix: IpNetwork,
        route_type: RouteType,
        sub_type: RouteSubType,
        attrs: &Attrs,
        config: &InstanceCfg,
    ) {
        let old = self.route_remove(
            afi_safi,
            prefix,
            RouteOrigin::Local,
            route_type,
            sub_type,
        );
        let attrs = self.store.intern(attrs);
        if let Some(old) = old {
            self.store.release(&old.attrs);
        }
        let route = Route::new(
            RouteOrigin::Local,
            route_type,
            sub_type,
            attrs,
            self.next_seq(),
        );
        self.route_add(afi_safi, prefix, route, config);
    }

    fn aggregate_increment(
        &mut self,
        afi_safi: AfiSafi,
        prefix: IpNetwork,
        route: &mut Route,
        config: &InstanceCfg,
    ) {
        let mut activate = vec![];
        let table = self.tables.get_mut(afi_safi);
        for (agg_prefix, aggregate) in table
            .aggregates
            .iter_mut()
            .filter(|(agg_prefix, _)| agg_prefix.is_strict_supernet_of(&prefix))
        {
            if aggregate.summary_only {
                route.suppress += 1;
            }
            if aggregate.count == 0 {
                activate.push(*agg_prefix);
            }
            aggregate.count += 1;
        }

        for agg_prefix in activate {
            self.aggregate_route_add(afi_safi, agg_prefix, config);
        }
    }

    fn aggregate_decrement(
        &mut self,
        afi_safi: AfiSafi,
        prefix: IpNetwork,
        route: &mut Route,
    ) {
        let mut deactivate = vec![];
        let table = self.tables.get_mut(afi_safi);
        for (agg_prefix, aggregate) in table
            .aggregates
            .iter_mut()
            .filter(|(agg_prefix, _)| agg_prefix.is_strict_supernet_of(&prefix))
        {
            if aggregate.summary_only {
                route.suppress = route.suppress.saturating_sub(1);
            }
            aggregate.count = aggregate.count.saturating_sub(1);
            if aggregate.count == 0 {
                deactivate.push(*agg_prefix);
            }
        }

        for agg_prefix in deactivate {
            self.aggregate_route_delete(afi_safi, agg_prefix);
        }
    }

    fn aggregate_route_add(
        &mut self,
        afi_safi: AfiSafi,
        prefix: IpNetwork,
        config: &InstanceCfg,
    ) {
        Debug::AggregateActivate(&prefix).log();

        let mut attrs = Attrs::local(Origin::Incomplete, DFLT_LOCAL_WEIGHT);
        attrs.base.atomic_aggregate = true;
        attrs.base.aggregator = Some(Aggregator {
            asn: config.local_as,
            identifier: config.router_id,
        });
        let attrs = self.store.intern(&attrs);
        let route = Route::new(
            RouteOrigin::Local,
            RouteType::Bgp,
            RouteSubType::Aggregate,
            attrs,
            self.next_seq(),
        );
        self.route_add(afi_safi, prefix, route, config);
    }

    fn aggregate_route_delete(&mut self, afi_safi: AfiSafi, prefix: IpNetwork) {
        if let Some(route) = self.route_remove(
            afi_safi,
            prefix,
            RouteOrigin::Local,
            RouteType::Bgp,
            RouteSubType::Aggregate,
        ) {
            Debug::AggregateDeactivate(&prefix).log();
            self.store.release(&route.attrs);
        }
    }
}

// ===== impl RoutingTables =====

impl RoutingTables {
    pub fn get(&self, afi_safi: AfiSafi) -> &RoutingTable {
        match afi_safi {
            AfiSafi::Ipv4Unicast => &self.ipv4_unicast,
            AfiSafi::Ipv4Multicast => &self.ipv4_multicast,
            AfiSafi::Ipv6Unicast => &self.ipv6_unicast,
            AfiSafi::Ipv6Multicast => &self.ipv6_multicast,
        }
    }

    pub fn get_mut(&mut self, afi_safi: AfiSafi) -> &mut RoutingTable {
        match afi_safi {
            AfiSafi::Ipv4Unicast => &mut self.ipv4_unicast,
            AfiSafi::Ipv4Multicast => &mut self.ipv4_multicast,
            AfiSafi::Ipv6Unicast => &mut self.ipv6_unicast,
            AfiSafi::Ipv6Multicast => &mut self.ipv6_multicast,
        }
    }
}

// ===== impl RoutingTable =====

impl RoutingTable {
    // Returns the selected route for the given prefix.
    pub fn selected(&self, prefix: &IpNetwork) -> Option<&Route> {
        self.prefixes
            .get(prefix)
            .and_then(|dest| dest.routes.iter().find(|route| route.selected))
    }

    // Queues a prefix for the decision process.
    //
    // A removed route that was selected takes precedence over one that
    // wasn't, since only the former matters for route uninstallation.
    fn queue(&mut self, prefix: IpNetwork, deleted: Option<Route>) {
        let entry = self.queued_prefixes.entry(prefix).or_default();
        if deleted.is_some() && entry.as_ref().is_none_or(|old| !old.selected)
        {
            *entry = deleted;
        }
    }
}

// ===== impl Route =====

impl Route {
    pub fn new(
        origin: RouteOrigin,
        route_type: RouteType,
        sub_type: RouteSubType,
        attrs: RouteAttrs,
        seq: u64,
    ) -> Route {
        Route {
            origin,
            route_type,
            sub_type,
            attrs,
            selected: false,
            suppress: 0,
            last_modified: Instant::now(),
            seq,
        }
    }

    // Routes learned through BGP are the only ones installed in the
    // forwarding table.
    pub fn is_fib_route(&self) -> bool {
        self.route_type == RouteType::Bgp && self.sub_type == RouteSubType::Normal
    }

    pub fn nexthop(&self, prefix: &IpNetwork) -> Option<IpAddr> {
        let base = &self.attrs.value.base;
        match prefix {
            IpNetwork::V4(_) => base.nexthop.map(IpAddr::V4),
            IpNetwork::V6(_) => base.mp_nexthop.map(|nexthop| nexthop.global()),
        }
    }

    // Compares two routes, telling whether `self` is preferred over `other`.
    pub fn compare(&self, other: &Route, config: &InstanceCfg) -> RouteCompare {
        let a = &self.attrs.value;
        let b = &other.attrs.value;

        // Prefer connected routes, static routes, aggregates and networks,
        // in that order.
        let tests = [
            (
                self.route_type == RouteType::Connected,
                other.route_type == RouteType::Connected,
                RouteRejectReason::ConnectedType,
            ),
            (
                self.route_type == RouteType::Static,
                other.route_type == RouteType::Static,
                RouteRejectReason::StaticType,
            ),
            (
                self.sub_type == RouteSubType::Aggregate,
                other.sub_type == RouteSubType::Aggregate,
                RouteRejectReason::AggregateSubType,
            ),
            (
                self.sub_type == RouteSubType::Static,
                other.sub_type == RouteSubType::Static,
                RouteRejectReason::StaticSubType,
            ),
        ];
        for (a, b, reason) in tests {
            match (a, b) {
                (true, false) => return RouteCompare::Preferred(reason),
                (false, true) => return RouteCompare::LessPreferred(reason),
                _ => {
                    // Move to next tie-breaker.
                }
            }
        }

        // Compare weights.
        let reason = RouteRejectReason::WeightLower;
        match a.base.weight.cmp(&b.base.weight) {
            Ordering::Less => {
                return RouteCompare::LessPreferred(reason);
            }
            Ordering::Greater => {
                return RouteCompare::Preferred(reason);
            }
            Ordering::Equal => {
                // Move to next tie-breaker.
            }
        }

        // Compare LOCAL_PREF attributes.
        let pref_a = a.base.local_pref.unwrap_or(DEFAULT_LOCAL_PREF);
        let pref_b = b.base.local_pref.unwrap_or(DEFAULT_LOCAL_PREF);
        let reason = RouteRejectReason::LocalPrefLower;
        match pref_a.cmp(&pref_b) {
            Ordering::Less => {
                return RouteCompare::LessPreferred(reason);
            }
            Ordering::Greater => {
                return RouteCompare::Preferred(reason);
            }
            Ordering::Equal => {
                // Move to next tie-breaker.
            }
        }

        // Compare AS_PATH lengths.
        let len_a = a.as_path.value.count();
        let len_b = b.as_path.value.count();
        let reason = RouteRejectReason::AsPathLonger;
        match len_a.cmp(&len_b) {
            Ordering::Less => {
                return RouteCompare::Preferred(reason);
            }
            Ordering::Greater => {
                return RouteCompare::LessPreferred(reason);
            }
            Ordering::Equal => {
                // Move to next tie-breaker.
            }
        }

        // Compare ORIGIN attributes.
        let reason = RouteRejectReason::OriginTypeHigher;
        match a.base.origin.cmp(&b.base.origin) {
            Ordering::Less => {
                return RouteCompare::Preferred(reason);
            }
            Ordering::Greater => {
                return RouteCompare::LessPreferred(reason);
            }
            Ordering::Equal => {
                // Move to next tie-breaker.
            }
        }

        // Compare MULTI_EXIT_DISC attributes.
        if config.always_compare_med
            || a.as_path.value.cmp_left(&b.as_path.value)
        {
            let missing = if config.missing_as_worst { u32::MAX } else { 0 };
            let med_a = a.base.med.unwrap_or(missing);
            let med_b = b.base.med.unwrap_or(missing);
            let reason = RouteRejectReason::MedHigher;
            match med_a.cmp(&med_b) {
                Ordering::Less => {
                    return RouteCompare::Preferred(reason);
                }
                Ordering::Greater => {
                    return RouteCompare::LessPreferred(reason);
                }
                Ordering::Equal => {
                    // Move to next tie-breaker.
                }
            }
        }

        // Prefer external peers.
        let reason = RouteRejectReason::PreferExternal;
        match (self.origin.peer_type(), other.origin.peer_type()) {
            (PeerType::External, PeerType::Internal) => {
                return RouteCompare::Preferred(reason);
            }
            (PeerType::Internal, PeerType::External) => {
                return RouteCompare::LessPreferred(reason);
            }
            _ => {
                // Move to next tie-breaker.
            }
        }

        // Compare peer BGP identifiers.
        let id_a = u32::from(self.origin.identifier());
        let id_b = u32::from(other.origin.identifier());
        let reason = RouteRejectReason::HigherRouterId;
        match id_a.cmp(&id_b) {
            Ordering::Less => {
                return RouteCompare::Preferred(reason);
            }
            Ordering::Greater => {
                return RouteCompare::LessPreferred(reason);
            }
            Ordering::Equal => {
                // Move to next tie-breaker.
            }
        }

        // Prefer the route that arrived first.
        let reason = RouteRejectReason::LaterArrival;
        match self.seq.cmp(&other.seq) {
            Ordering::Greater => RouteCompare::LessPreferred(reason),
            _ => RouteCompare::Preferred(reason),
        }
    }
}

// ===== impl RouteOrigin =====

impl RouteOrigin {
    pub fn remote_addr(&self) -> Option<IpAddr> {
        match self {
            RouteOrigin::Local => None,
            RouteOrigin::Neighbor { remote_addr, .. } => Some(*remote_addr),
        }
    }

    // Locally originated routes compare as if learned from an external
    // peer with a zero identifier.
    pub fn identifier(&self) -> Ipv4Addr {
        match self {
            RouteOrigin::Local => Ipv4Addr::UNSPECIFIED,
            RouteOrigin::Neighbor { identifier, .. } => *identifier,
        }
    }

    pub fn peer_type(&self) -> PeerType {
        match self {
            RouteOrigin::Local => PeerType::External,
            RouteOrigin::Neighbor { peer_type, .. } => *peer_type,
        }
    }
}

// ===== helper functions =====

// Returns the index of the best non-suppressed route.
fn best_path(routes: &[Route], config: &InstanceCfg) -> Option<usize> {
    let mut best: Option<usize> = None;
    for (idx, route) in routes.iter().enumerate() {
        if route.suppress > 0 {
            continue;
        }
        match best {
            None => best = Some(idx),
            Some(best_idx) => {
                if let RouteCompare::Preferred(_) =
                    route.compare(&routes[best_idx], config)
                {
                    best = Some(idx);
                }
            }
        }
    }
    best
}

fn reflector_clients(neighbors: &Neighbors) -> BTreeSet<IpAddr> {
    neighbors
        .values()
        .filter(|nbr| nbr.config.reflector_client)
        .map(|nbr| nbr.remote_addr)
        .collect()
}

fn adj_out_set(store: &mut AttrStore, adj_rib: &mut AdjRib, attrs: &Attrs) {
    let handle = store.intern(attrs);
    if let Some(old) = adj_rib.out.replace(handle) {
        store.release(&old);
    }
}

// Returns whether an entry was present.
fn adj_out_unset(
    store: &mut AttrStore,
    adj_rib: &mut BTreeMap<IpAddr, AdjRib>,
    addr: &IpAddr,
) -> bool {
    let Some(entry) = adj_rib.get_mut(addr) else {
        return false;
    };
    let Some(old) = entry.out.take() else {
        return false;
    };
    store.release(&old);
    if entry.in_.is_none() {
        adj_rib.remove(addr);
    }
    true
}

fn adj_in_unset(
    store: &mut AttrStore,
    adj_rib: &mut BTreeMap<IpAddr, AdjRib>,
    addr: &IpAddr,
) {
    let Some(entry) = adj_rib.get_mut(addr) else {
        return;
    };
    if let Some(old) = entry.in_.take() {
        store.release(&old);
    }
    if entry.out.is_none() {
        adj_rib.remove(addr);
    }
}

fn route_key(prefix: &IpNetwork, route: &Route) -> RouteKeyMsg {
    RouteKeyMsg {
        prefix: *prefix,
        family: prefix.address_family(),
        nexthop: route.nexthop(prefix),
    }
}

// ===== global functions =====

// Returns whether `new` is preferred over `existing`.
pub fn route_compare(
    new: Option<&Route>,
    existing: Option<&Route>,
    config: &InstanceCfg,
) -> bool {
    match (new, existing) {
        (None, _) => false,
        (Some(_), None) => true,
        (Some(new), Some(existing)) => matches!(
            new.compare(existing, config),
            RouteCompare::Preferred(_)
        ),
    }
}

// Checks whether a route can be announced to the given neighbor, returning
// the attributes to announce.
pub fn announce_check(
    route: &Route,
    prefix: &IpNetwork,
    afi_safi: AfiSafi,
    nbr: &Neighbor,
    from_client: bool,
    config: &InstanceCfg,
    policy: &PolicyCfg,
) -> Option<Attrs> {
    let nbr_cfg = &nbr.config;
    let addr = &nbr.remote_addr;

    // Don't send the route back to its sender.
    if route.origin.remote_addr() == Some(nbr.remote_addr) {
        return None;
    }

    // Aggregate suppression.
    if route.suppress > 0 {
        return None;
    }

    // Well-known communities.
    let record = &route.attrs.value;
    if let Some(comm) = &record.comm
        && (comm.value.contains(&Comm::NO_ADVERTISE)
            || (comm.value.contains(&Comm::NO_EXPORT)
                && nbr.peer_type == PeerType::External))
    {
        let reason = RouteFilterReason::Community;
        Debug::NbrRouteNotAnnounced(addr, prefix, reason).log();
        return None;
    }

    // The route was originated by this neighbor.
    if let Some(originator_id) = record.base.originator_id
        && nbr.identifier == Some(originator_id)
    {
        let reason = RouteFilterReason::OriginatorId;
        Debug::NbrRouteNotAnnounced(addr, prefix, reason).log();
        return None;
    }

    // Output distribute-list, prefix-list and filter-list.
    let mut attrs = record.get();
    if !policy.neighbor_filter(nbr_cfg, FilterDirection::Out, prefix, &attrs)
    {
        let reason = RouteFilterReason::OutputFilter;
        Debug::NbrRouteNotAnnounced(addr, prefix, reason).log();
        return None;
    }

    // Default route.
    if prefix.is_default() && !nbr_cfg.default_originate {
        let reason = RouteFilterReason::DefaultRoute;
        Debug::NbrRouteNotAnnounced(addr, prefix, reason).log();
        return None;
    }

    // AS_PATH loop checks.
    if attrs.as_path.loop_check(nbr_cfg.remote_as)
        || config
            .confederation_id
            .is_some_and(|confed_id| attrs.as_path.loop_check(confed_id))
    {
        let reason = RouteFilterReason::AsPathLoop;
        Debug::NbrRouteNotAnnounced(addr, prefix, reason).log();
        return None;
    }

    // Route reflection: routes from non-client internal peers are only
    // reflected to clients.
    let reflected = route.origin.peer_type() == PeerType::Internal
        && nbr.peer_type == PeerType::Internal;
    if reflected && !from_client && !nbr_cfg.reflector_client {
        return None;
    }
    if reflected && attrs.base.originator_id.is_none() {
        attrs.base.originator_id = Some(route.origin.identifier());
    }

    // Default LOCAL_PREF toward internal peers.
    if matches!(nbr.peer_type, PeerType::Internal | PeerType::Confed)
        && attrs.base.local_pref.is_none()
    {
        attrs.base.local_pref = Some(DEFAULT_LOCAL_PREF);
    }

    // MULTI_EXIT_DISC isn't sent to external peers.
    if nbr.peer_type == PeerType::External {
        attrs.base.med = None;
    }

    // Next hop.
    let nexthop_self = route.origin == RouteOrigin::Local
        || (!nbr_cfg.route_server_client
            && !nbr_cfg.transparent_next_hop
            && (nbr.peer_type == PeerType::External || nbr_cfg.next_hop_self));
    if nexthop_self {
        attrs.base.nexthop = Some(nbr.nexthop.v4);
    }
    if afi_safi.afi() == Afi::Ipv6 {
        let global = if nexthop_self {
            nbr.nexthop.v6_global
        } else {
            attrs
                .base
                .mp_nexthop
                .and_then(|nexthop| match nexthop.global() {
                    IpAddr::V6(addr) => Some(addr),
                    IpAddr::V4(_) => None,
                })
                .unwrap_or(Ipv6Addr::UNSPECIFIED)
        };
        // Link-local next hops are only sent to peers on a shared network,
        // and never to route-reflector clients.
        let local = nbr
            .nexthop
            .v6_local
            .filter(|_| nbr.shared_network && !nbr_cfg.reflector_client)
            .filter(|local| local.is_unicast_link_local());
        attrs.base.mp_nexthop = Some(match local {
            Some(local) => MpNexthop::Ipv6LinkLocal { global, local },
            None => MpNexthop::Ipv6(global),
        });
    }

    // Output route-map.
    if let Some(name) = &nbr_cfg.route_map_out
        && !policy.route_map_apply(name, prefix, &mut attrs)
    {
        let reason = RouteFilterReason::RouteMapOut;
        Debug::NbrRouteNotAnnounced(addr, prefix, reason).log();
        return None;
    }

    Some(attrs)
}
