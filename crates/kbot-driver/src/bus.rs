//! 总线集合与亲和路由
//!
//! 每条物理接口对应一个 [`BusHandle`]。[`BusSet`] 保存按发现顺序排列的接口列表，
//! 并记住每个执行器最近一次应答所在的接口：后续请求先走该接口，
//! 未命中时按列表顺序回退到其余可达接口。

use kbot_can::CanAdapter;
use kbot_protocol::ActuatorId;
use smallvec::SmallVec;
use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, warn};

/// 路由候选（最多 7 条总线，栈上分配）
pub type Route = SmallVec<[usize; 8]>;

/// 接口健康状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusHealth {
    Reachable,
    Unreachable,
}

/// 已发出但尚未收到应答的请求
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingResponse {
    pub actuator: ActuatorId,
    pub sent_at: Instant,
}

/// 单条物理总线
pub struct BusHandle<A> {
    name: String,
    adapter: Option<A>,
    health: BusHealth,
    /// 超时未应答的请求，由 `drain_missing_responses` 回收
    pub(crate) missing: Vec<PendingResponse>,
}

impl<A> BusHandle<A> {
    pub fn reachable(name: impl Into<String>, adapter: A) -> Self {
        Self {
            name: name.into(),
            adapter: Some(adapter),
            health: BusHealth::Reachable,
            missing: Vec::new(),
        }
    }

    /// 启动失败的接口：保留名字用于诊断，不参与路由
    pub fn unreachable(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            adapter: None,
            health: BusHealth::Unreachable,
            missing: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn health(&self) -> BusHealth {
        self.health
    }

    pub fn is_reachable(&self) -> bool {
        self.health == BusHealth::Reachable && self.adapter.is_some()
    }

    pub fn adapter_mut(&mut self) -> Option<&mut A> {
        if self.health == BusHealth::Reachable {
            self.adapter.as_mut()
        } else {
            None
        }
    }

    pub fn missing_count(&self) -> usize {
        self.missing.len()
    }
}

impl<A: CanAdapter> BusHandle<A> {
    /// 从适配器创建（名字取自适配器）
    pub fn from_adapter(adapter: A) -> Self {
        let name = adapter.name().to_string();
        Self::reachable(name, adapter)
    }
}

/// 有序接口列表 + 执行器亲和缓存
pub struct BusSet<A> {
    buses: Vec<BusHandle<A>>,
    affinity: HashMap<ActuatorId, usize>,
}

impl<A> Default for BusSet<A> {
    fn default() -> Self {
        Self {
            buses: Vec::new(),
            affinity: HashMap::new(),
        }
    }
}

impl<A> BusSet<A> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bus: BusHandle<A>) -> usize {
        self.buses.push(bus);
        self.buses.len() - 1
    }

    pub fn len(&self) -> usize {
        self.buses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buses.is_empty()
    }

    pub fn reachable_count(&self) -> usize {
        self.buses.iter().filter(|b| b.is_reachable()).count()
    }

    pub fn get(&self, index: usize) -> Option<&BusHandle<A>> {
        self.buses.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut BusHandle<A>> {
        self.buses.get_mut(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &BusHandle<A>> {
        self.buses.iter()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.buses.iter().position(|b| b.name == name)
    }

    pub fn name_of(&self, index: usize) -> Option<&str> {
        self.buses.get(index).map(|b| b.name.as_str())
    }

    /// 缓存的首选接口（仅当其仍可达）
    pub fn preferred(&self, actuator: ActuatorId) -> Option<usize> {
        self.affinity
            .get(&actuator)
            .copied()
            .filter(|&i| self.buses.get(i).is_some_and(|b| b.is_reachable()))
    }

    /// 发送顺序：首选接口在前，其余可达接口按发现顺序
    pub fn route(&self, actuator: ActuatorId) -> Route {
        let mut route = Route::new();
        let preferred = self.preferred(actuator);
        if let Some(i) = preferred {
            route.push(i);
        }
        for (i, bus) in self.buses.iter().enumerate() {
            if Some(i) != preferred && bus.is_reachable() {
                route.push(i);
            }
        }
        route
    }

    /// 记录应答所在接口
    pub fn remember(&mut self, actuator: ActuatorId, index: usize) {
        if index >= self.buses.len() {
            return;
        }
        let previous = self.affinity.insert(actuator, index);
        if previous != Some(index) {
            debug!(
                "Actuator {} now routed via {}",
                actuator, self.buses[index].name
            );
        }
    }

    pub fn forget(&mut self, actuator: ActuatorId) {
        self.affinity.remove(&actuator);
    }

    /// 接口运行期掉线：不再参与路由，缓存指向它的执行器回退到完整列表
    pub fn mark_unreachable(&mut self, index: usize) {
        if let Some(bus) = self.buses.get_mut(index)
            && bus.health == BusHealth::Reachable
        {
            warn!("CAN bus {} marked unreachable", bus.name);
            bus.health = BusHealth::Unreachable;
            bus.missing.clear();
            self.affinity.retain(|_, i| *i != index);
        }
    }

    /// 执行器 → 接口名（已知的亲和关系）
    pub fn assignments(&self) -> Vec<(ActuatorId, &str)> {
        let mut out: Vec<_> = self
            .affinity
            .iter()
            .map(|(id, &i)| (*id, self.buses[i].name.as_str()))
            .collect();
        out.sort_by_key(|(id, _)| *id);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn set(names: &[&str]) -> BusSet<()> {
        let mut set = BusSet::new();
        for name in names {
            set.push(BusHandle::reachable(*name, ()));
        }
        set
    }

    #[test]
    fn test_route_without_affinity_is_discovery_order() {
        let set = set(&["can0", "can1", "can2"]);
        assert_eq!(set.route(ActuatorId::new(11)).as_slice(), &[0, 1, 2]);
    }

    #[test]
    fn test_route_prefers_cached_bus() {
        let mut set = set(&["can0", "can1", "can2"]);
        set.remember(ActuatorId::new(34), 2);
        assert_eq!(set.route(ActuatorId::new(34)).as_slice(), &[2, 0, 1]);
        // 其他执行器不受影响
        assert_eq!(set.route(ActuatorId::new(11)).as_slice(), &[0, 1, 2]);
    }

    #[test]
    fn test_route_skips_unreachable() {
        let mut set = set(&["can0", "can1"]);
        set.push(BusHandle::unreachable("can2"));
        set.push(BusHandle::reachable("can3", ()));
        assert_eq!(set.route(ActuatorId::new(21)).as_slice(), &[0, 1, 3]);
        assert_eq!(set.reachable_count(), 3);
    }

    #[test]
    fn test_mark_unreachable_drops_affinity() {
        let mut set = set(&["can0", "can1"]);
        set.remember(ActuatorId::new(41), 1);
        set.mark_unreachable(1);
        assert_eq!(set.preferred(ActuatorId::new(41)), None);
        assert_eq!(set.route(ActuatorId::new(41)).as_slice(), &[0]);
        assert_eq!(set.get(1).unwrap().health(), BusHealth::Unreachable);
    }

    #[test]
    fn test_remember_out_of_range_is_ignored() {
        let mut set = set(&["can0"]);
        set.remember(ActuatorId::new(11), 5);
        assert_eq!(set.preferred(ActuatorId::new(11)), None);
    }

    #[test]
    fn test_assignments_sorted() {
        let mut set = set(&["can0", "can1"]);
        set.remember(ActuatorId::new(42), 1);
        set.remember(ActuatorId::new(12), 0);
        assert_eq!(
            set.assignments(),
            vec![(ActuatorId::new(12), "can0"), (ActuatorId::new(42), "can1")]
        );
    }

    proptest! {
        #[test]
        fn prop_route_covers_each_reachable_bus_once(
            reachable in proptest::collection::vec(any::<bool>(), 1..8),
            cached in 0usize..8,
        ) {
            let mut set: BusSet<()> = BusSet::new();
            for (i, up) in reachable.iter().enumerate() {
                let name = format!("can{}", i);
                set.push(if *up { BusHandle::reachable(name, ()) } else { BusHandle::unreachable(name) });
            }
            let id = ActuatorId::new(31);
            set.remember(id, cached);

            let route = set.route(id);
            let mut sorted = route.to_vec();
            sorted.sort_unstable();
            let expected: Vec<usize> = (0..reachable.len()).filter(|&i| reachable[i]).collect();
            prop_assert_eq!(sorted, expected);

            if cached < reachable.len() && reachable[cached] {
                prop_assert_eq!(route.first().copied(), Some(cached));
            }
        }
    }

    #[test]
    fn test_index_lookup() {
        let set = set(&["can0", "can4"]);
        assert_eq!(set.index_of("can4"), Some(1));
        assert_eq!(set.name_of(0), Some("can0"));
        assert_eq!(set.index_of("can9"), None);
    }
}
