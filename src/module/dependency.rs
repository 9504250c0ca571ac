//! 模块依赖管理
//!
//! 本模块提供模块依赖关系的图结构和解析器。
//!
//! # 主要组件
//!
//! - [`DependencyGraph`] - 依赖关系图，支持环检测与拓扑排序
//! - [`DependencyResolver`] - 依赖解析器：安装顺序基于清单（依赖可能尚未安装），
//!   卸载顺序与反向依赖基于注册表（只有已安装模块才参与级联）
//!
//! # 示例
//!
//! ```rust
//! use chips_app_manager::module::dependency::DependencyGraph;
//!
//! let mut graph = DependencyGraph::new();
//! graph.add_dependency("forms", "core");
//! graph.add_dependency("reports", "forms");
//!
//! assert_eq!(graph.load_order().unwrap(), vec!["core", "forms", "reports"]);
//! assert_eq!(graph.unload_order().unwrap(), vec!["reports", "forms", "core"]);
//! ```

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::sync::Arc;

use semver::{Version, VersionReq};
use tracing::debug;

use super::catalog::ManifestProvider;
use super::registry::RegistryEntry;
use crate::utils::{CoreError, Result};

/// 模块依赖关系图
///
/// 节点与边都有序存储，排序结果稳定。
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// 正向边：模块 ID -> 该模块依赖的模块
    edges: BTreeMap<String, BTreeSet<String>>,
    /// 反向边：模块 ID -> 依赖该模块的模块
    reverse_edges: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    /// 创建一个空的依赖图
    pub fn new() -> Self {
        Self::default()
    }

    /// 由注册表条目构建依赖图
    ///
    /// 指向未安装模块的依赖也会作为节点加入。
    pub fn from_entries(entries: &[RegistryEntry]) -> Self {
        let mut graph = Self::new();
        for entry in entries {
            graph.add_module(&entry.module_id);
            for dep in entry.dependencies.keys() {
                graph.add_dependency(&entry.module_id, dep);
            }
        }
        graph
    }

    /// 添加模块节点，已存在时忽略
    pub fn add_module(&mut self, module_id: &str) {
        self.edges.entry(module_id.to_string()).or_default();
        self.reverse_edges.entry(module_id.to_string()).or_default();
    }

    /// 添加依赖关系：`module_id` 依赖 `dependency_id`
    pub fn add_dependency(&mut self, module_id: &str, dependency_id: &str) {
        self.add_module(module_id);
        self.add_module(dependency_id);

        self.edges
            .entry(module_id.to_string())
            .or_default()
            .insert(dependency_id.to_string());
        self.reverse_edges
            .entry(dependency_id.to_string())
            .or_default()
            .insert(module_id.to_string());
    }

    /// 移除模块及其所有依赖关系
    pub fn remove_module(&mut self, module_id: &str) {
        if let Some(deps) = self.edges.remove(module_id) {
            for dep in deps {
                if let Some(rev) = self.reverse_edges.get_mut(&dep) {
                    rev.remove(module_id);
                }
            }
        }
        if let Some(dependents) = self.reverse_edges.remove(module_id) {
            for dependent in dependents {
                if let Some(deps) = self.edges.get_mut(&dependent) {
                    deps.remove(module_id);
                }
            }
        }
    }

    /// 保留指定模块构成的子图
    pub fn retain_modules(&mut self, keep: &BTreeSet<String>) {
        let removed: Vec<String> = self
            .edges
            .keys()
            .filter(|id| !keep.contains(*id))
            .cloned()
            .collect();
        for module_id in removed {
            self.remove_module(&module_id);
        }
    }

    /// 直接依赖
    pub fn get_dependencies(&self, module_id: &str) -> Vec<String> {
        self.edges
            .get(module_id)
            .map(|deps| deps.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// 直接依赖者
    pub fn get_dependents(&self, module_id: &str) -> Vec<String> {
        self.reverse_edges
            .get(module_id)
            .map(|deps| deps.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// 传递依赖者（广度优先），不含模块自身
    pub fn get_all_dependents(&self, module_id: &str) -> Vec<String> {
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::from([module_id.to_string()]);

        while let Some(current) = queue.pop_front() {
            if let Some(dependents) = self.reverse_edges.get(&current) {
                for dependent in dependents {
                    if dependent != module_id && seen.insert(dependent.clone()) {
                        queue.push_back(dependent.clone());
                    }
                }
            }
        }

        seen.into_iter().collect()
    }

    /// 查找循环依赖路径，首尾为同一模块
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();
        let mut path = Vec::new();

        for node in self.edges.keys() {
            if let Some(cycle) = self.find_cycle_util(node, &mut visited, &mut rec_stack, &mut path)
            {
                return Some(cycle);
            }
        }

        None
    }

    fn find_cycle_util(
        &self,
        node: &str,
        visited: &mut HashSet<String>,
        rec_stack: &mut HashSet<String>,
        path: &mut Vec<String>,
    ) -> Option<Vec<String>> {
        if rec_stack.contains(node) {
            let start = path.iter().position(|n| n == node).unwrap_or(0);
            let mut cycle = path[start..].to_vec();
            cycle.push(node.to_string());
            return Some(cycle);
        }
        if !visited.insert(node.to_string()) {
            return None;
        }

        rec_stack.insert(node.to_string());
        path.push(node.to_string());

        if let Some(neighbors) = self.edges.get(node) {
            for neighbor in neighbors {
                if let Some(cycle) = self.find_cycle_util(neighbor, visited, rec_stack, path) {
                    return Some(cycle);
                }
            }
        }

        path.pop();
        rec_stack.remove(node);
        None
    }

    /// 是否存在循环依赖
    pub fn has_cycle(&self) -> bool {
        self.find_cycle().is_some()
    }

    /// 拓扑排序（Kahn 算法），依赖在前
    ///
    /// 同一层的模块按 ID 排序。
    ///
    /// # Errors
    ///
    /// 存在循环依赖时返回 `CoreError::CircularDependency`。
    pub fn topological_sort(&self) -> Result<Vec<String>> {
        if let Some(cycle) = self.find_cycle() {
            return Err(CoreError::CircularDependency { cycle });
        }

        // 入度 = 该模块依赖的模块数
        let mut in_degree: BTreeMap<&str, usize> = self
            .edges
            .iter()
            .map(|(node, deps)| (node.as_str(), deps.len()))
            .collect();

        let mut ready: BTreeSet<&str> = in_degree
            .iter()
            .filter(|(_, &degree)| degree == 0)
            .map(|(node, _)| *node)
            .collect();

        let mut result = Vec::with_capacity(self.edges.len());
        while let Some(node) = ready.pop_first() {
            result.push(node.to_string());
            if let Some(dependents) = self.reverse_edges.get(node) {
                for dependent in dependents {
                    if let Some(degree) = in_degree.get_mut(dependent.as_str()) {
                        *degree -= 1;
                        if *degree == 0 {
                            ready.insert(dependent.as_str());
                        }
                    }
                }
            }
        }

        if result.len() != self.edges.len() {
            return Err(CoreError::Internal("无法完成拓扑排序".to_string()));
        }

        Ok(result)
    }

    /// 加载顺序（依赖在前）
    pub fn load_order(&self) -> Result<Vec<String>> {
        self.topological_sort()
    }

    /// 卸载顺序（加载顺序的反序）
    pub fn unload_order(&self) -> Result<Vec<String>> {
        let mut order = self.topological_sort()?;
        order.reverse();
        Ok(order)
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn module_count(&self) -> usize {
        self.edges.len()
    }

    pub fn contains_module(&self, module_id: &str) -> bool {
        self.edges.contains_key(module_id)
    }
}

/// 依赖解析器
pub struct DependencyResolver {
    manifests: Arc<dyn ManifestProvider>,
}

impl DependencyResolver {
    pub fn new(manifests: Arc<dyn ManifestProvider>) -> Self {
        Self { manifests }
    }

    /// 解析安装顺序
    ///
    /// 深度优先遍历清单依赖图，最深的依赖在前，`module_id` 自身在最后。
    ///
    /// # Errors
    ///
    /// - `CoreError::ManifestNotFound` - 模块或任一依赖没有清单
    /// - `CoreError::CircularDependency` - 遍历中遇到正在访问的模块
    pub fn resolve_install_order(&self, module_id: &str) -> Result<Vec<String>> {
        let mut resolved = Vec::new();
        let mut visiting = Vec::new();
        let mut visited = HashSet::new();

        self.resolve_recursive(module_id, &mut resolved, &mut visiting, &mut visited)?;

        debug!(module_id = %module_id, order = ?resolved, "安装顺序已解析");
        Ok(resolved)
    }

    fn resolve_recursive(
        &self,
        module_id: &str,
        resolved: &mut Vec<String>,
        visiting: &mut Vec<String>,
        visited: &mut HashSet<String>,
    ) -> Result<()> {
        if visited.contains(module_id) {
            return Ok(());
        }

        // visiting 即当前 DFS 路径
        if let Some(start) = visiting.iter().position(|m| m == module_id) {
            let mut cycle = visiting[start..].to_vec();
            cycle.push(module_id.to_string());
            return Err(CoreError::CircularDependency { cycle });
        }

        let manifest = self
            .manifests
            .get(module_id)
            .ok_or_else(|| CoreError::ManifestNotFound(module_id.to_string()))?;

        visiting.push(module_id.to_string());
        for dep in manifest.dependencies.keys() {
            self.resolve_recursive(dep, resolved, visiting, visited)?;
        }
        visiting.pop();

        visited.insert(module_id.to_string());
        resolved.push(module_id.to_string());
        Ok(())
    }

    /// 检查依赖版本要求
    ///
    /// 对 `modules` 中每个模块声明的依赖，已安装的依赖按注册表中的版本检查，
    /// 未安装的按目录中清单的版本检查。
    pub fn check_versions(&self, modules: &[String], installed: &[RegistryEntry]) -> Result<()> {
        for module_id in modules {
            let manifest = self
                .manifests
                .get(module_id)
                .ok_or_else(|| CoreError::ManifestNotFound(module_id.clone()))?;

            for (dep_id, requirement) in &manifest.dependencies {
                let found = match installed.iter().find(|e| &e.module_id == dep_id) {
                    Some(entry) => entry.version.clone(),
                    None => {
                        self.manifests
                            .get(dep_id)
                            .ok_or_else(|| CoreError::ManifestNotFound(dep_id.clone()))?
                            .version
                    }
                };
                Self::check_requirement(module_id, dep_id, requirement, &found)?;
            }
        }
        Ok(())
    }

    /// 检查单个版本要求
    pub fn check_requirement(
        module_id: &str,
        dep_id: &str,
        requirement: &str,
        found: &str,
    ) -> Result<()> {
        let req = VersionReq::parse(requirement).map_err(|e| {
            CoreError::InvalidMetadata(format!(
                "模块 '{}' 对 '{}' 的版本要求 '{}' 格式无效: {}",
                module_id, dep_id, requirement, e
            ))
        })?;
        let version = Version::parse(found)?;

        if !req.matches(&version) {
            return Err(CoreError::VersionMismatch {
                module: module_id.to_string(),
                dependency: dep_id.to_string(),
                required: requirement.to_string(),
                found: found.to_string(),
            });
        }
        Ok(())
    }

    /// 解析卸载顺序
    ///
    /// 在注册表依赖图中取 `module_ids` 构成的子图，依赖者在被依赖者之前。
    pub fn resolve_uninstall_order(
        &self,
        module_ids: &[String],
        entries: &[RegistryEntry],
    ) -> Result<Vec<String>> {
        let keep: BTreeSet<String> = module_ids.iter().cloned().collect();
        let mut graph = DependencyGraph::from_entries(entries);
        for module_id in &keep {
            graph.add_module(module_id);
        }
        graph.retain_modules(&keep);
        graph.unload_order()
    }

    /// 查找依赖该模块的全部已安装模块（直接与传递）
    pub fn find_dependents(&self, module_id: &str, entries: &[RegistryEntry]) -> Vec<String> {
        DependencyGraph::from_entries(entries).get_all_dependents(module_id)
    }

    /// 直接依赖该模块的已安装模块
    pub fn find_direct_dependents(
        &self,
        module_id: &str,
        entries: &[RegistryEntry],
    ) -> Vec<String> {
        entries
            .iter()
            .filter(|e| e.depends_on(module_id))
            .map(|e| e.module_id.clone())
            .collect()
    }
}
