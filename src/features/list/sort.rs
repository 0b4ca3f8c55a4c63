use std::cmp::Ordering;

use strum::{Display, EnumIter, EnumString};

use crate::features::resource::{DetailColumns as _, Resource};

use super::quantity::{cpu_millicores, memory_mib};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum SortField {
    #[default]
    Name,
    Namespace,
    Kind,
    Status,
    Created,
    Cpu,
    Memory,
    Size,
    Restarts,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

impl SortDirection {
    pub fn toggle(self) -> Self {
        match self {
            Self::Ascending => Self::Descending,
            Self::Descending => Self::Ascending,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SortState {
    pub field: SortField,
    pub direction: SortDirection,
}

impl SortState {
    pub fn new(field: SortField, direction: SortDirection) -> Self {
        Self { field, direction }
    }

    /// Same field toggles the direction, a new field starts ascending.
    pub fn select(&mut self, field: SortField) {
        if self.field == field {
            self.direction = self.direction.toggle();
        } else {
            self.field = field;
            self.direction = SortDirection::Ascending;
        }
    }

    /// Direction applies to the selected field only; ties always fall back
    /// to name, namespace, kind ascending.
    pub fn compare(&self, a: &Resource, b: &Resource) -> Ordering {
        let primary = compare_field(self.field, a, b);

        let primary = match self.direction {
            SortDirection::Ascending => primary,
            SortDirection::Descending => primary.reverse(),
        };

        primary
            .then_with(|| compare_field(SortField::Name, a, b))
            .then_with(|| compare_field(SortField::Namespace, a, b))
            .then_with(|| compare_field(SortField::Kind, a, b))
    }

    pub fn sort(&self, resources: &mut [&Resource]) {
        resources.sort_by(|a, b| self.compare(a, b));
    }
}

fn compare_text(a: &str, b: &str) -> Ordering {
    a.to_lowercase()
        .cmp(&b.to_lowercase())
        .then_with(|| a.cmp(b))
}

fn compare_field(field: SortField, a: &Resource, b: &Resource) -> Ordering {
    match field {
        SortField::Name => compare_text(&a.name, &b.name),
        SortField::Namespace => compare_text(&a.namespace, &b.namespace),
        SortField::Kind => compare_text(&a.kind, &b.kind),
        SortField::Status => compare_text(&a.status, &b.status),
        SortField::Created => a
            .created_at()
            .cmp(&b.created_at())
            .then_with(|| a.created.cmp(&b.created)),
        SortField::Cpu => {
            let a = cpu_millicores(a.details.cpu().unwrap_or_default());
            let b = cpu_millicores(b.details.cpu().unwrap_or_default());
            a.total_cmp(&b)
        }
        SortField::Memory => {
            let a = memory_mib(a.details.memory().unwrap_or_default());
            let b = memory_mib(b.details.memory().unwrap_or_default());
            a.total_cmp(&b)
        }
        SortField::Size => {
            let a = memory_mib(a.details.size().unwrap_or_default());
            let b = memory_mib(b.details.size().unwrap_or_default());
            a.total_cmp(&b)
        }
        SortField::Restarts => a
            .details
            .restarts()
            .unwrap_or_default()
            .cmp(&b.details.restarts().unwrap_or_default()),
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use crate::features::{
        list::filter::{Filter, ScopeFilter},
        resource::{PodDetails, ResourceDetails},
    };

    use super::*;

    fn pod(name: &str, namespace: &str, cpu: &str, memory: &str) -> Resource {
        Resource {
            kind: "Pod".into(),
            name: name.into(),
            namespace: namespace.into(),
            details: ResourceDetails::Pod(PodDetails {
                cpu: cpu.into(),
                memory: memory.into(),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn names(resources: &[&Resource]) -> Vec<String> {
        resources.iter().map(|r| r.name.to_string()).collect()
    }

    #[test]
    fn cpu_sorts_by_millicores() {
        let pods = [
            pod("a", "default", "100m", ""),
            pod("b", "default", "1", ""),
            pod("c", "default", "", ""),
        ];

        let mut rows: Vec<&Resource> = pods.iter().collect();

        SortState::new(SortField::Cpu, SortDirection::Ascending).sort(&mut rows);

        assert_eq!(names(&rows), vec!["c", "a", "b"]);
    }

    #[test]
    fn memory_sorts_by_mib() {
        let pods = [
            pod("a", "default", "", "1Gi"),
            pod("b", "default", "", "128Mi"),
            pod("c", "default", "", "garbage"),
        ];

        let mut rows: Vec<&Resource> = pods.iter().collect();

        SortState::new(SortField::Memory, SortDirection::Descending).sort(&mut rows);

        assert_eq!(names(&rows), vec!["a", "b", "c"]);
    }

    #[test]
    fn ties_break_on_name_then_namespace() {
        let pods = [
            pod("web", "prod", "1", ""),
            pod("api", "prod", "1", ""),
            pod("web", "dev", "1", ""),
        ];

        let mut rows: Vec<&Resource> = pods.iter().collect();

        SortState::new(SortField::Cpu, SortDirection::Descending).sort(&mut rows);

        let ids: Vec<String> = rows
            .iter()
            .map(|r| format!("{}/{}", r.namespace, r.name))
            .collect();

        assert_eq!(ids, vec!["prod/api", "dev/web", "prod/web"]);
    }

    #[test]
    fn names_compare_case_insensitively() {
        let pods = [
            pod("beta", "", "", ""),
            pod("Alpha", "", "", ""),
            pod("alpha2", "", "", ""),
        ];

        let mut rows: Vec<&Resource> = pods.iter().collect();

        SortState::default().sort(&mut rows);

        assert_eq!(names(&rows), vec!["Alpha", "alpha2", "beta"]);
    }

    #[rstest]
    #[case(SortField::Name, SortField::Name, SortDirection::Descending)]
    #[case(SortField::Name, SortField::Cpu, SortDirection::Ascending)]
    fn select(
        #[case] current: SortField,
        #[case] clicked: SortField,
        #[case] expected: SortDirection,
    ) {
        let mut state = SortState::new(current, SortDirection::Ascending);

        state.select(clicked);

        assert_eq!(state, SortState::new(clicked, expected));
    }

    #[test]
    fn selecting_new_field_resets_descending_to_ascending() {
        let mut state = SortState::new(SortField::Name, SortDirection::Descending);

        state.select(SortField::Memory);

        assert_eq!(state.direction, SortDirection::Ascending);
    }

    #[test]
    fn filter_commutes_with_sort() {
        let pods = [
            pod("web-1", "prod", "250m", ""),
            pod("api-1", "prod", "1", ""),
            pod("web-2", "dev", "", ""),
            pod("worker", "dev", "100m", ""),
            pod("web-3", "dev", "2", ""),
        ];

        let filter = Filter::new("web", ScopeFilter::All);
        let sort = SortState::new(SortField::Cpu, SortDirection::Ascending);

        let mut filtered_then_sorted = filter.apply(&pods);
        sort.sort(&mut filtered_then_sorted);

        let mut sorted: Vec<&Resource> = pods.iter().collect();
        sort.sort(&mut sorted);
        let sorted_then_filtered = filter.apply(sorted.iter().copied());
        let refiltered = filter.apply(sorted_then_filtered.iter().copied());

        assert_eq!(filtered_then_sorted, refiltered);
        assert_eq!(names(&refiltered), vec!["web-2", "web-1", "web-3"]);
    }
}
