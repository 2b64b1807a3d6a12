//! TypeRegistry: the type lattice with precomputed ancestry.
//!
//! Every type gets a dense [`TypeId`] and a node in a `petgraph` lattice whose
//! edges point from a type to its direct supertypes. Because supertypes must
//! be registered before their subtypes, the lattice is acyclic by
//! construction and a single shortest-path walk at registration time yields
//! both the ancestor set (as a bitset) and the depth of every ancestor. After
//! that `is_ancestor` is a bit test and `distance` a hash lookup.
//!
//! Parametric instantiations (`List[T]`, `Set[T]`, `Map[K,V]`, `Channel[T]`)
//! are interned: the same family and arguments always yield the same id.

use std::collections::HashMap;

use indexmap::IndexMap;
use petgraph::algo::dijkstra;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{VisitMap, Visitable};
use petgraph::Direction;

use crate::error::CoreError;
use crate::id::TypeId;
use crate::types::{split_qualified, AttributeDef, TypeDef, TypeFamily, TypeFlags, TypeParams};

/// Supertype lattice: node `i` is `TypeId(i)`, edges run subtype -> supertype.
pub type Lattice = DiGraph<TypeId, ()>;

type AncestorSet = <Lattice as Visitable>::Map;

/// Pre-registered ids of the built-in lattice.
impl TypeId {
    pub const ANY: TypeId = TypeId(0);
    pub const RELISH_PRIMITIVE: TypeId = TypeId(1);
    pub const NON_PRIMITIVE: TypeId = TypeId(2);
    pub const NUMERIC: TypeId = TypeId(3);
    pub const INTEGER: TypeId = TypeId(4);
    pub const INT: TypeId = TypeId(5);
    pub const INT32: TypeId = TypeId(6);
    pub const UINT: TypeId = TypeId(7);
    pub const UINT32: TypeId = TypeId(8);
    pub const BYTE: TypeId = TypeId(9);
    pub const FLOAT: TypeId = TypeId(10);
    pub const BOOL: TypeId = TypeId(11);
    pub const STRING: TypeId = TypeId(12);
    pub const BYTES: TypeId = TypeId(13);
    pub const TIME: TypeId = TypeId(14);
    pub const NIL: TypeId = TypeId(15);
    pub const COLLECTION: TypeId = TypeId(16);
    pub const LIST: TypeId = TypeId(17);
    pub const SET: TypeId = TypeId(18);
    pub const MAP: TypeId = TypeId(19);
    pub const CHANNEL: TypeId = TypeId(20);
    pub const MUTEX: TypeId = TypeId(21);
    pub const RW_MUTEX: TypeId = TypeId(22);
    pub const CALLABLE: TypeId = TypeId(23);
}

#[derive(Debug, Clone)]
struct Ancestry {
    set: AncestorSet,
    depths: HashMap<TypeId, u32>,
}

/// Registry of all types known to a runtime.
#[derive(Debug, Clone)]
pub struct TypeRegistry {
    types: Vec<TypeDef>,
    names: HashMap<String, TypeId>,
    lattice: Lattice,
    ancestry: Vec<Ancestry>,
    /// Full attribute layout per type: inherited attributes first.
    layouts: Vec<IndexMap<String, AttributeDef>>,
    parametric: HashMap<TypeParams, TypeId>,
}

impl TypeRegistry {
    /// Number of built-in types pre-registered on construction.
    pub const BUILTIN_COUNT: u32 = 24;

    /// Creates a registry holding the built-in lattice.
    pub fn new() -> Self {
        let mut reg = TypeRegistry {
            types: Vec::new(),
            names: HashMap::new(),
            lattice: Lattice::new(),
            ancestry: Vec::new(),
            layouts: Vec::new(),
            parametric: HashMap::new(),
        };

        let prim = TypeFlags {
            is_primitive: true,
            ..TypeFlags::default()
        };
        let native = TypeFlags {
            is_native: true,
            ..TypeFlags::default()
        };
        let collection = TypeFlags {
            is_native: true,
            is_collection: true,
            ..TypeFlags::default()
        };

        let builtins: [(&str, &[TypeId], TypeFlags); 24] = [
            ("Any", &[], TypeFlags::default()),
            ("RelishPrimitive", &[TypeId::ANY], prim),
            ("NonPrimitive", &[TypeId::ANY], TypeFlags::default()),
            ("Numeric", &[TypeId::RELISH_PRIMITIVE], prim),
            ("Integer", &[TypeId::NUMERIC], prim),
            ("Int", &[TypeId::INTEGER], prim),
            ("Int32", &[TypeId::INTEGER], prim),
            ("Uint", &[TypeId::INTEGER], prim),
            ("Uint32", &[TypeId::INTEGER], prim),
            ("Byte", &[TypeId::INTEGER], prim),
            ("Float", &[TypeId::NUMERIC], prim),
            ("Bool", &[TypeId::RELISH_PRIMITIVE], prim),
            ("String", &[TypeId::RELISH_PRIMITIVE], prim),
            ("Bytes", &[TypeId::RELISH_PRIMITIVE], prim),
            ("Time", &[TypeId::RELISH_PRIMITIVE], prim),
            ("Nil", &[TypeId::NON_PRIMITIVE], native),
            ("Collection", &[TypeId::NON_PRIMITIVE], collection),
            ("List", &[TypeId::COLLECTION], collection),
            ("Set", &[TypeId::COLLECTION], collection),
            (
                "Map",
                &[TypeId::COLLECTION],
                TypeFlags {
                    is_map: true,
                    ..collection
                },
            ),
            ("Channel", &[TypeId::NON_PRIMITIVE], native),
            ("Mutex", &[TypeId::NON_PRIMITIVE], native),
            ("RwMutex", &[TypeId::NON_PRIMITIVE], native),
            ("Callable", &[TypeId::NON_PRIMITIVE], native),
        ];

        for (name, supers, flags) in builtins {
            reg.insert(name.to_string(), None, supers.to_vec(), Vec::new(), flags, None);
        }
        debug_assert_eq!(reg.types.len() as u32, Self::BUILTIN_COUNT);
        reg
    }

    /// Registers a structured type.
    ///
    /// `name` may be qualified by its package path (`shop/Car`). An empty
    /// supertype list defaults to `NonPrimitive`. An attribute may refer to
    /// the type being registered: its id is reserved before the attributes
    /// are checked. Fails with [`CoreError::DuplicateType`] if the name is
    /// bound, and [`CoreError::TypeNotFound`] if a supertype or attribute
    /// type is not registered yet.
    pub fn register_type(
        &mut self,
        name: &str,
        supertypes: &[TypeId],
        attributes: Vec<AttributeDef>,
    ) -> Result<TypeId, CoreError> {
        if self.names.contains_key(name) {
            return Err(CoreError::DuplicateType {
                name: name.to_string(),
            });
        }
        for id in supertypes {
            if self.get(*id).is_none() {
                return Err(CoreError::TypeNotFound { id: *id });
            }
        }
        let reserved = TypeId(self.types.len() as u32);
        for attr in &attributes {
            if attr.type_id != reserved && self.get(attr.type_id).is_none() {
                return Err(CoreError::TypeNotFound { id: attr.type_id });
            }
        }

        let supertypes = if supertypes.is_empty() {
            vec![TypeId::NON_PRIMITIVE]
        } else {
            supertypes.to_vec()
        };

        let mut flags = TypeFlags::default();
        let mut non_primitive = false;
        for s in &supertypes {
            let def = &self.types[s.index()];
            if def.flags.is_primitive {
                flags.is_primitive = true;
            } else if *s != TypeId::ANY {
                non_primitive = true;
            }
            flags.is_collection |= def.flags.is_collection;
            flags.is_map |= def.flags.is_map;
        }
        if flags.is_primitive && non_primitive {
            return Err(CoreError::MixedLattice {
                name: name.to_string(),
            });
        }

        let package = split_qualified(name).0.map(str::to_string);
        let id = self.insert(name.to_string(), package, supertypes, attributes, flags, None);
        tracing::debug!(type_name = name, id = id.0, "registered type");
        Ok(id)
    }

    /// Registers `name` with no attributes of its own yet.
    ///
    /// Together with [`TypeRegistry::define_attributes`] this lets a group of
    /// types refer to each other: declare every name first, then attach the
    /// attributes once all ids exist.
    pub fn declare_type(&mut self, name: &str, supertypes: &[TypeId]) -> Result<TypeId, CoreError> {
        self.register_type(name, supertypes, Vec::new())
    }

    /// Replaces the declared attributes of `id` and rebuilds the layout of
    /// `id` and of every type inheriting from it.
    pub fn define_attributes(
        &mut self,
        id: TypeId,
        attributes: Vec<AttributeDef>,
    ) -> Result<(), CoreError> {
        let def = self.get(id).ok_or(CoreError::TypeNotFound { id })?;
        if def.params.is_some() || id.0 < Self::BUILTIN_COUNT {
            return Err(CoreError::BuiltinType {
                name: def.name.clone(),
            });
        }
        for attr in &attributes {
            if self.get(attr.type_id).is_none() {
                return Err(CoreError::TypeNotFound { id: attr.type_id });
            }
        }
        self.types[id.index()].attributes = attributes;

        // Subtypes always have larger ids than their supertypes.
        for index in id.index()..self.types.len() {
            let sub = TypeId(index as u32);
            if self.is_ancestor(id, sub) {
                let def = &self.types[index];
                let layout = self.build_layout(&def.supertypes, &def.attributes);
                self.layouts[index] = layout;
            }
        }
        Ok(())
    }

    fn build_layout(
        &self,
        supertypes: &[TypeId],
        attributes: &[AttributeDef],
    ) -> IndexMap<String, AttributeDef> {
        let mut layout = IndexMap::new();
        for s in supertypes {
            for (attr_name, attr) in &self.layouts[s.index()] {
                layout
                    .entry(attr_name.clone())
                    .or_insert_with(|| attr.clone());
            }
        }
        for attr in attributes {
            layout
                .entry(attr.name.clone())
                .or_insert_with(|| attr.clone());
        }
        layout
    }

    fn insert(
        &mut self,
        name: String,
        package: Option<String>,
        supertypes: Vec<TypeId>,
        attributes: Vec<AttributeDef>,
        flags: TypeFlags,
        params: Option<TypeParams>,
    ) -> TypeId {
        let id = TypeId(self.types.len() as u32);
        let node = self.lattice.add_node(id);
        debug_assert_eq!(node.index(), id.index());
        for s in &supertypes {
            self.lattice.add_edge(node, NodeIndex::new(s.index()), ());
        }

        // Every edge costs one step, so this is a BFS over the supertype DAG.
        let reached = dijkstra(&self.lattice, node, None, |_| 1u32);
        let mut set = self.lattice.visit_map();
        let mut depths = HashMap::with_capacity(reached.len());
        for (n, depth) in reached {
            set.visit(n);
            depths.insert(TypeId(n.index() as u32), depth);
        }

        let layout = self.build_layout(&supertypes, &attributes);

        self.names.insert(name.clone(), id);
        if let Some(p) = &params {
            self.parametric.insert(p.clone(), id);
        }
        self.types.push(TypeDef {
            id,
            name,
            package,
            supertypes,
            attributes,
            flags,
            params,
        });
        self.ancestry.push(Ancestry { set, depths });
        self.layouts.push(layout);
        id
    }

    // -----------------------------------------------------------------------
    // Lookup
    // -----------------------------------------------------------------------

    /// Looks up a type by canonical name.
    pub fn lookup(&self, name: &str) -> Option<TypeId> {
        self.names.get(name).copied()
    }

    /// Resolves a type name, interning parametric names such as
    /// `Map[String,List[shop/Car]]` on the way.
    pub fn resolve(&mut self, name: &str) -> Result<TypeId, CoreError> {
        if let Some(id) = self.lookup(name) {
            return Ok(id);
        }
        let unknown = || CoreError::UnknownType {
            name: name.to_string(),
        };
        let (base, args) = parse_parametric(name).ok_or_else(unknown)?;
        let family = TypeFamily::from_base_name(base).ok_or_else(unknown)?;
        if args.len() != family.arity() {
            return Err(unknown());
        }
        let mut ids = Vec::with_capacity(args.len());
        for arg in args {
            ids.push(self.resolve(arg)?);
        }
        Ok(self.intern(family, ids))
    }

    /// Returns the type definition for `id`.
    pub fn get(&self, id: TypeId) -> Option<&TypeDef> {
        self.types.get(id.index())
    }

    /// Canonical name of `id`, or `?` for an unknown id.
    pub fn name(&self, id: TypeId) -> &str {
        self.get(id).map_or("?", |t| t.name.as_str())
    }

    pub fn is_primitive(&self, id: TypeId) -> bool {
        self.get(id).is_some_and(|t| t.flags.is_primitive)
    }

    pub fn is_collection(&self, id: TypeId) -> bool {
        self.get(id).is_some_and(|t| t.flags.is_collection)
    }

    /// Full attribute layout of `id`, inherited attributes first.
    pub fn layout(&self, id: TypeId) -> Option<&IndexMap<String, AttributeDef>> {
        self.layouts.get(id.index())
    }

    /// Slot index and descriptor of attribute `name` on `id`.
    pub fn attribute(&self, id: TypeId, name: &str) -> Option<(usize, &AttributeDef)> {
        self.layout(id)?
            .get_full(name)
            .map(|(index, _, attr)| (index, attr))
    }

    /// Parametric family and arguments of `id`, if it is an instantiation.
    pub fn params(&self, id: TypeId) -> Option<&TypeParams> {
        self.get(id)?.params.as_ref()
    }

    /// Element type of a list, set or channel type; value type of a map type.
    pub fn element_type(&self, id: TypeId) -> Option<TypeId> {
        self.params(id)?.args.last().copied()
    }

    /// Key type of a map type.
    pub fn key_type(&self, id: TypeId) -> Option<TypeId> {
        let params = self.params(id)?;
        (params.family == TypeFamily::Map).then(|| params.args[0])
    }

    /// Direct subtypes of `id`.
    pub fn subtypes(&self, id: TypeId) -> Vec<TypeId> {
        let mut subs: Vec<TypeId> = self
            .lattice
            .neighbors_directed(NodeIndex::new(id.index()), Direction::Incoming)
            .map(|n| self.lattice[n])
            .collect();
        subs.sort();
        subs
    }

    /// Number of registered types.
    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// All registered types in id order.
    pub fn iter(&self) -> impl Iterator<Item = &TypeDef> {
        self.types.iter()
    }

    /// Comma-separated type names, as used in signature keys and diagnostics.
    pub fn signature_key(&self, ids: &[TypeId]) -> String {
        ids.iter()
            .map(|id| self.name(*id))
            .collect::<Vec<_>>()
            .join(",")
    }

    // -----------------------------------------------------------------------
    // Parametric constructors
    // -----------------------------------------------------------------------

    pub fn list_type(&mut self, element: TypeId) -> TypeId {
        self.intern(TypeFamily::List, vec![element])
    }

    pub fn set_type(&mut self, element: TypeId) -> TypeId {
        self.intern(TypeFamily::Set, vec![element])
    }

    pub fn map_type(&mut self, key: TypeId, value: TypeId) -> TypeId {
        self.intern(TypeFamily::Map, vec![key, value])
    }

    pub fn channel_type(&mut self, element: TypeId) -> TypeId {
        self.intern(TypeFamily::Channel, vec![element])
    }

    /// Looks up an already interned instantiation without creating it.
    pub fn find_instantiation(&self, family: TypeFamily, args: &[TypeId]) -> Option<TypeId> {
        self.parametric
            .get(&TypeParams {
                family,
                args: args.to_vec(),
            })
            .copied()
    }

    fn intern(&mut self, family: TypeFamily, args: Vec<TypeId>) -> TypeId {
        let params = TypeParams { family, args };
        if let Some(id) = self.parametric.get(&params) {
            return *id;
        }

        let name = format!("{}[{}]", family.base_name(), self.signature_key(&params.args));
        let (base, flags) = match family {
            TypeFamily::List => (TypeId::LIST, self.types[TypeId::LIST.index()].flags),
            TypeFamily::Set => (TypeId::SET, self.types[TypeId::SET.index()].flags),
            TypeFamily::Map => (TypeId::MAP, self.types[TypeId::MAP.index()].flags),
            TypeFamily::Channel => (TypeId::CHANNEL, self.types[TypeId::CHANNEL.index()].flags),
        };
        self.insert(name, None, vec![base], Vec::new(), flags, Some(params))
    }

    // -----------------------------------------------------------------------
    // Subtyping
    // -----------------------------------------------------------------------

    /// Whether `a` is equal to or a transitive supertype of `b`.
    ///
    /// Parametric instantiations compare covariantly: `List[T]` is an
    /// ancestor of `List[S]` (or of any type inheriting from `List[S]`) iff
    /// `T` is an ancestor of `S`.
    pub fn is_ancestor(&self, a: TypeId, b: TypeId) -> bool {
        if a == b || a == TypeId::ANY {
            return true;
        }
        let (Some(def_a), Some(anc_b)) = (self.get(a), self.ancestry.get(b.index())) else {
            return false;
        };
        match &def_a.params {
            Some(params) => self.parametric_depth(params, b).is_some(),
            None => anc_b.set.is_visited(&NodeIndex::<u32>::new(a.index())),
        }
    }

    /// Length of the shortest supertype path from `b` up to `a`, or `None`
    /// if `a` is not an ancestor of `b`.
    pub fn distance(&self, a: TypeId, b: TypeId) -> Option<u32> {
        if a == b {
            return Some(0);
        }
        let def_a = self.get(a)?;
        match &def_a.params {
            Some(params) => self.parametric_depth(params, b),
            None => self.ancestry.get(b.index())?.depths.get(&a).copied(),
        }
    }

    /// `s` is more specific than `t`: `t` is an ancestor of `s` but not the
    /// reverse.
    pub fn is_more_specific(&self, s: TypeId, t: TypeId) -> bool {
        s != t && self.is_ancestor(t, s) && !self.is_ancestor(s, t)
    }

    fn parametric_depth(&self, params: &TypeParams, b: TypeId) -> Option<u32> {
        let anc_b = self.ancestry.get(b.index())?;
        anc_b
            .depths
            .iter()
            .filter_map(|(x, depth)| {
                let px = self.types[x.index()].params.as_ref()?;
                if px.family != params.family || px.args.len() != params.args.len() {
                    return None;
                }
                let mut total = *depth;
                for (declared, actual) in params.args.iter().zip(&px.args) {
                    total += self.distance(*declared, *actual)?;
                }
                Some(total)
            })
            .min()
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Splits `Base[A,B[C]]` into `("Base", ["A", "B[C]"])` at top-level commas.
fn parse_parametric(name: &str) -> Option<(&str, Vec<&str>)> {
    let open = name.find('[')?;
    if !name.ends_with(']') {
        return None;
    }
    let base = &name[..open];
    let inner = &name[open + 1..name.len() - 1];
    let mut args = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in inner.char_indices() {
        match c {
            '[' => depth += 1,
            ']' => depth = depth.checked_sub(1)?,
            ',' if depth == 0 => {
                args.push(inner[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return None;
    }
    args.push(inner[start..].trim());
    if args.iter().any(|a| a.is_empty()) {
        return None;
    }
    Some((base, args))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CollectionKind;

    fn vehicles() -> (TypeRegistry, TypeId, TypeId, TypeId) {
        let mut reg = TypeRegistry::new();
        let vehicle = reg
            .register_type(
                "shop/Vehicle",
                &[],
                vec![AttributeDef::single("wheels", TypeId::INT)],
            )
            .unwrap();
        let car = reg
            .register_type(
                "shop/Car",
                &[vehicle],
                vec![AttributeDef::single("color", TypeId::STRING)],
            )
            .unwrap();
        let sports = reg.register_type("shop/SportsCar", &[car], vec![]).unwrap();
        (reg, vehicle, car, sports)
    }

    #[test]
    fn new_registry_has_builtin_lattice() {
        let reg = TypeRegistry::new();
        assert_eq!(reg.len() as u32, TypeRegistry::BUILTIN_COUNT);
        assert_eq!(reg.lookup("Any"), Some(TypeId::ANY));
        assert_eq!(reg.lookup("String"), Some(TypeId::STRING));
        assert_eq!(reg.lookup("RwMutex"), Some(TypeId::RW_MUTEX));
        assert_eq!(reg.name(TypeId::CALLABLE), "Callable");
    }

    #[test]
    fn any_is_ancestor_of_everything() {
        let (reg, _, _, sports) = vehicles();
        for def in reg.iter() {
            assert!(reg.is_ancestor(TypeId::ANY, def.id), "{}", def.name);
        }
        assert_eq!(reg.distance(TypeId::ANY, sports), Some(4));
    }

    #[test]
    fn primitives_and_non_primitives_are_disjoint() {
        let (reg, vehicle, _, _) = vehicles();
        assert!(reg.is_ancestor(TypeId::RELISH_PRIMITIVE, TypeId::INT));
        assert!(!reg.is_ancestor(TypeId::NON_PRIMITIVE, TypeId::INT));
        assert!(reg.is_ancestor(TypeId::NON_PRIMITIVE, vehicle));
        assert!(!reg.is_ancestor(TypeId::RELISH_PRIMITIVE, vehicle));
        assert!(!reg.is_ancestor(TypeId::RELISH_PRIMITIVE, TypeId::NIL));
    }

    #[test]
    fn duplicate_type_is_rejected() {
        let (mut reg, _, _, _) = vehicles();
        let err = reg.register_type("shop/Car", &[], vec![]).unwrap_err();
        assert_eq!(
            err,
            CoreError::DuplicateType {
                name: "shop/Car".into()
            }
        );
    }

    #[test]
    fn unregistered_supertype_is_rejected() {
        let mut reg = TypeRegistry::new();
        let err = reg.register_type("Orphan", &[TypeId(999)], vec![]).unwrap_err();
        assert_eq!(err, CoreError::TypeNotFound { id: TypeId(999) });
    }

    #[test]
    fn mixed_lattice_is_rejected() {
        let (mut reg, vehicle, _, _) = vehicles();
        let err = reg
            .register_type("Weird", &[TypeId::INT, vehicle], vec![])
            .unwrap_err();
        assert!(matches!(err, CoreError::MixedLattice { .. }));
    }

    #[test]
    fn ancestry_and_depth() {
        let (reg, vehicle, car, sports) = vehicles();
        assert!(reg.is_ancestor(vehicle, sports));
        assert!(reg.is_ancestor(car, car));
        assert!(!reg.is_ancestor(sports, vehicle));
        assert_eq!(reg.distance(vehicle, sports), Some(2));
        assert_eq!(reg.distance(car, sports), Some(1));
        assert_eq!(reg.distance(sports, vehicle), None);
        assert!(reg.is_more_specific(sports, vehicle));
        assert!(!reg.is_more_specific(vehicle, sports));
        assert!(!reg.is_more_specific(car, car));
    }

    #[test]
    fn diamond_takes_shortest_path() {
        let mut reg = TypeRegistry::new();
        let a = reg.register_type("A", &[], vec![]).unwrap();
        let b = reg.register_type("B", &[a], vec![]).unwrap();
        let c = reg.register_type("C", &[b, a], vec![]).unwrap();
        assert_eq!(reg.distance(a, c), Some(1));
        assert_eq!(reg.subtypes(a), vec![b, c]);
    }

    #[test]
    fn layout_puts_inherited_attributes_first() {
        let (reg, _, car, sports) = vehicles();
        let names: Vec<&str> = reg.layout(sports).unwrap().keys().map(|k| k.as_str()).collect();
        assert_eq!(names, vec!["wheels", "color"]);
        let (index, attr) = reg.attribute(car, "color").unwrap();
        assert_eq!(index, 1);
        assert_eq!(attr.type_id, TypeId::STRING);
        assert!(reg.attribute(car, "engine").is_none());
    }

    #[test]
    fn parametric_types_are_interned() {
        let (mut reg, _, car, _) = vehicles();
        let a = reg.list_type(car);
        let b = reg.list_type(car);
        assert_eq!(a, b);
        assert_eq!(reg.name(a), "List[shop/Car]");
        assert_ne!(reg.set_type(car), a);
        let m = reg.map_type(TypeId::STRING, a);
        assert_eq!(reg.name(m), "Map[String,List[shop/Car]]");
        assert_eq!(reg.key_type(m), Some(TypeId::STRING));
        assert_eq!(reg.element_type(m), Some(a));
        assert!(reg.is_collection(a));
        assert!(reg.get(m).unwrap().flags.is_map);
        assert_eq!(reg.find_instantiation(TypeFamily::List, &[car]), Some(a));
    }

    #[test]
    fn parametric_covariance() {
        let (mut reg, vehicle, car, sports) = vehicles();
        let list_vehicle = reg.list_type(vehicle);
        let list_sports = reg.list_type(sports);
        let set_car = reg.set_type(car);
        assert!(reg.is_ancestor(list_vehicle, list_sports));
        assert!(!reg.is_ancestor(list_sports, list_vehicle));
        assert!(!reg.is_ancestor(list_vehicle, set_car));
        assert!(reg.is_ancestor(TypeId::LIST, list_sports));
        assert!(reg.is_ancestor(TypeId::COLLECTION, set_car));
        assert_eq!(reg.distance(list_vehicle, list_sports), Some(2));
        assert_eq!(reg.distance(TypeId::LIST, list_sports), Some(1));

        let map_a = reg.map_type(TypeId::STRING, vehicle);
        let map_b = reg.map_type(TypeId::STRING, car);
        let map_c = reg.map_type(TypeId::INT, car);
        assert!(reg.is_ancestor(map_a, map_b));
        assert!(!reg.is_ancestor(map_a, map_c));
    }

    #[test]
    fn user_type_inheriting_parametric_type_is_covariant() {
        let (mut reg, vehicle, car, _) = vehicles();
        let list_car = reg.list_type(car);
        let garage = reg.register_type("shop/Garage", &[list_car], vec![]).unwrap();
        let list_vehicle = reg.list_type(vehicle);
        assert!(reg.is_ancestor(list_vehicle, garage));
        assert_eq!(reg.distance(list_vehicle, garage), Some(2));
        assert!(reg.is_collection(garage));
    }

    #[test]
    fn resolve_interns_parametric_names() {
        let (mut reg, _, car, _) = vehicles();
        let id = reg.resolve("Map[String,List[shop/Car]]").unwrap();
        let list_car = reg.list_type(car);
        assert_eq!(reg.map_type(TypeId::STRING, list_car), id);
        assert_eq!(reg.resolve("shop/Car").unwrap(), car);
        assert!(matches!(
            reg.resolve("Vector[Int]"),
            Err(CoreError::UnknownType { .. })
        ));
        assert!(reg.resolve("List[Int,Int]").is_err());
        assert!(reg.resolve("List[Int").is_err());
    }

    #[test]
    fn parse_parametric_splits_top_level_commas() {
        assert_eq!(
            parse_parametric("Map[String,Map[Int,Bool]]"),
            Some(("Map", vec!["String", "Map[Int,Bool]"]))
        );
        assert_eq!(parse_parametric("List[]"), None);
        assert_eq!(parse_parametric("Int"), None);
    }

    #[test]
    fn multi_valued_attribute_layout() {
        let (mut reg, _, car, _) = vehicles();
        let fleet = reg
            .register_type(
                "shop/Fleet",
                &[],
                vec![AttributeDef::many("cars", car, CollectionKind::SortedList)],
            )
            .unwrap();
        let (_, attr) = reg.attribute(fleet, "cars").unwrap();
        assert!(attr.is_multi_valued());
        assert_eq!(attr.collection, Some(CollectionKind::SortedList));
    }

    #[test]
    fn attribute_may_refer_to_its_own_type() {
        let mut reg = TypeRegistry::new();
        let next = TypeId(reg.len() as u32);
        let node = reg
            .register_type(
                "list/Node",
                &[],
                vec![
                    AttributeDef::single("value", TypeId::INT),
                    AttributeDef::single("next", next),
                ],
            )
            .unwrap();
        assert_eq!(node, next);
        let (_, attr) = reg.attribute(node, "next").unwrap();
        assert_eq!(attr.type_id, node);
    }

    #[test]
    fn attribute_past_the_reserved_id_is_rejected() {
        let mut reg = TypeRegistry::new();
        let beyond = TypeId(reg.len() as u32 + 1);
        let err = reg
            .register_type("p/T", &[], vec![AttributeDef::single("x", beyond)])
            .unwrap_err();
        assert_eq!(err, CoreError::TypeNotFound { id: beyond });
        assert!(reg.lookup("p/T").is_none());
    }

    #[test]
    fn mutually_recursive_types_via_declare_then_define() {
        let mut reg = TypeRegistry::new();
        let person = reg.declare_type("org/Person", &[]).unwrap();
        let team = reg.declare_type("org/Team", &[]).unwrap();
        let lead = reg.declare_type("org/Lead", &[person]).unwrap();
        reg.define_attributes(
            person,
            vec![
                AttributeDef::single("name", TypeId::STRING),
                AttributeDef::single("team", team),
            ],
        )
        .unwrap();
        reg.define_attributes(
            team,
            vec![AttributeDef::many("members", person, CollectionKind::List)],
        )
        .unwrap();

        assert_eq!(reg.attribute(person, "team").unwrap().1.type_id, team);
        assert_eq!(reg.attribute(team, "members").unwrap().1.type_id, person);
        // Subtypes declared before their supertype's attributes still inherit them.
        let names: Vec<&str> = reg.layout(lead).unwrap().keys().map(|k| k.as_str()).collect();
        assert_eq!(names, vec!["name", "team"]);
    }

    #[test]
    fn builtin_types_take_no_attributes() {
        let mut reg = TypeRegistry::new();
        let list_int = reg.list_type(TypeId::INT);
        for id in [TypeId::STRING, list_int] {
            assert!(matches!(
                reg.define_attributes(id, vec![AttributeDef::single("x", TypeId::INT)]),
                Err(CoreError::BuiltinType { .. })
            ));
        }
    }
}
